use crate::error::{LinkError, Result};
use crate::framing::{classify, ProcessedRecord, ResponseLine};
use crate::orchestrator::CancelFlag;
use crate::session::LinkSession;
use crate::transport::Connector;
use log::{debug, warn};
use std::time::{Duration, Instant};

/// Why collection of a batch reply stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEnd {
    Sentinel,
    BudgetExpired,
    Cancelled,
    /// Transport error; the message is kept for the batch summary
    Failed(String),
}

/// Records gathered for one batch, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub records: Vec<ProcessedRecord>,
    pub end: CollectionEnd,
    pub header_seen: bool,
    /// Lines that were read but contributed nothing
    pub discarded: usize,
}

impl Collection {
    pub fn ended(end: CollectionEnd) -> Self {
        Self {
            records: Vec::new(),
            end,
            header_seen: false,
            discarded: 0,
        }
    }
}

/// Reads one batch reply within a fixed time budget
#[derive(Debug, Clone)]
pub struct ResponseCollector {
    budget: Duration,
    read_poll: Duration,
}

impl ResponseCollector {
    pub fn new(budget: Duration, read_poll: Duration) -> Self {
        Self { budget, read_poll }
    }

    /// Collect records until a sentinel, the budget runs out, or `cancel` is set.
    ///
    /// Lines before the header are discarded. A sentinel ends collection even
    /// when fewer than `expected` records arrived; deciding what that means is
    /// left to the recovery policy.
    pub fn collect<C: Connector>(
        &self,
        session: &mut LinkSession<C>,
        expected: usize,
        cancel: &CancelFlag,
    ) -> Result<Collection> {
        let mut collection = Collection::ended(CollectionEnd::BudgetExpired);
        let start = Instant::now();

        loop {
            if cancel.is_cancelled() {
                collection.end = CollectionEnd::Cancelled;
                break;
            }
            let elapsed = start.elapsed();
            if elapsed >= self.budget {
                collection.end = CollectionEnd::BudgetExpired;
                break;
            }
            let window = self.read_poll.min(self.budget - elapsed);

            let line = match session.read_line(window) {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(e @ (LinkError::SessionClosed | LinkError::NotConnected)) => return Err(e),
                Err(e) => {
                    warn!("read failed while collecting: {}", e);
                    collection.end = CollectionEnd::Failed(e.to_string());
                    break;
                }
            };

            match classify(&line) {
                ResponseLine::Header => collection.header_seen = true,
                ResponseLine::Sentinel => {
                    collection.end = CollectionEnd::Sentinel;
                    break;
                }
                ResponseLine::Record(record) if collection.header_seen => {
                    collection.records.push(record)
                }
                ResponseLine::Record(_) | ResponseLine::Noise => {
                    debug!("discarded: {}", line);
                    collection.discarded += 1;
                }
            }
        }

        debug!(
            "collected {}/{} records ({:?}, {} discarded, {:?})",
            collection.records.len(),
            expected,
            collection.end,
            collection.discarded,
            start.elapsed()
        );
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::scripted::{response_table, ScriptedConnector};

    fn connected(connector: ScriptedConnector) -> LinkSession<ScriptedConnector> {
        let mut session = LinkSession::new(connector, LinkConfig::without_delays());
        session.connect().unwrap();
        session
    }

    fn collector() -> ResponseCollector {
        ResponseCollector::new(Duration::from_millis(100), Duration::from_millis(5))
    }

    #[test]
    fn test_collects_until_sentinel() {
        let pairs: Vec<(u16, u16)> = (0..10).map(|i| (500 + i, 400 + i)).collect();
        let connector = ScriptedConnector::new()
            .after("t")
            .line("COMUNICACIÓN OK")
            .lines(response_table(&pairs));
        let mut session = connected(connector);

        let collection = collector().collect(&mut session, 10, &CancelFlag::new()).unwrap();
        assert_eq!(collection.end, CollectionEnd::Sentinel);
        assert!(collection.header_seen);
        assert_eq!(collection.records.len(), 10);
        assert_eq!(collection.records[3].input, 503);
        assert_eq!(collection.records[3].output, 403);
    }

    #[test]
    fn test_pre_header_lines_discarded() {
        let connector = ScriptedConnector::new()
            .after("t")
            .line("COMUNICACIÓN OK")
            .lines([
                "Enviando datos...",
                "0,1,2",
                "index,input,output",
                "0,10,20",
                "basura",
                "1,11,21",
            ])
            .line("ENVÍO COMPLETADO");
        let mut session = connected(connector);

        let collection = collector().collect(&mut session, 2, &CancelFlag::new()).unwrap();
        assert_eq!(collection.end, CollectionEnd::Sentinel);
        assert_eq!(collection.discarded, 3);
        let inputs: Vec<u16> = collection.records.iter().map(|r| r.input).collect();
        assert_eq!(inputs, vec![10, 11]);
    }

    #[test]
    fn test_sentinel_before_header_stops() {
        let connector = ScriptedConnector::new()
            .after("t")
            .line("COMUNICACIÓN OK")
            .line("FIN_DATOS")
            .lines(response_table(&[(1, 1)]));
        let mut session = connected(connector);

        let collection = collector().collect(&mut session, 1, &CancelFlag::new()).unwrap();
        assert_eq!(collection.end, CollectionEnd::Sentinel);
        assert!(collection.records.is_empty());
    }

    #[test]
    fn test_budget_expiry_keeps_partial_records() {
        let connector = ScriptedConnector::new()
            .after("t")
            .line("COMUNICACIÓN OK")
            .lines(["index,input,output", "0,100,90", "1,101,91"]);
        let mut session = connected(connector);

        let start = Instant::now();
        let collection = collector().collect(&mut session, 600, &CancelFlag::new()).unwrap();
        assert_eq!(collection.end, CollectionEnd::BudgetExpired);
        assert_eq!(collection.records.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_stops_collection() {
        let connector = ScriptedConnector::new().after("t").line("COMUNICACIÓN OK");
        let mut session = connected(connector);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let collection = collector().collect(&mut session, 5, &cancel).unwrap();
        assert_eq!(collection.end, CollectionEnd::Cancelled);
    }

    #[test]
    fn test_closed_session_propagates() {
        let connector = ScriptedConnector::new().after("t").line("COMUNICACIÓN OK");
        let mut session = connected(connector);
        session.disconnect();

        let result = collector().collect(&mut session, 5, &CancelFlag::new());
        assert!(matches!(result, Err(LinkError::SessionClosed)));
    }
}
