use crate::sample::{FilterMode, Sample};

/// First line of the device's response table
pub const HEADER_LINE: &str = "index,input,output";

/// End-of-batch markers; the device prints one of them after the last record
pub const SENTINELS: [&str; 3] = ["FIN_DATOS", "ENVÍO COMPLETADO", "ENVIO COMPLETADO"];

/// Prefix of an outbound sample line
pub const DATA_PREFIX: &str = "DATA:";

/// Host-to-device commands, one per line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Test,
    Reset,
    SelectFilter(FilterMode),
    Capture,
    RequestSend,
}

impl Command {
    pub fn to_line(self) -> String {
        match self {
            Command::Test => "t".to_string(),
            Command::Reset => "r".to_string(),
            Command::SelectFilter(mode) => mode.selector().to_string(),
            Command::Capture => "c".to_string(),
            Command::RequestSend => "s".to_string(),
        }
    }
}

/// Outbound line for one sample: `DATA:<value>`
pub fn encode_sample(sample: Sample) -> String {
    format!("{}{}", DATA_PREFIX, sample.value())
}

/// One decoded `index,input,output` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedRecord {
    /// Device-reported index; kept for diagnostics only
    pub index: Option<usize>,
    pub input: u16,
    pub output: u16,
}

/// Classification of one inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    Header,
    Sentinel,
    Record(ProcessedRecord),
    /// Anything else: banners, partial writes, status chatter
    Noise,
}

/// Classify an inbound line.
///
/// Header wins over sentinel, sentinel over record. A record needs at least
/// three comma-separated fields with integer input and output fields.
pub fn classify(line: &str) -> ResponseLine {
    let line = line.trim();

    if line == HEADER_LINE {
        return ResponseLine::Header;
    }
    if SENTINELS.iter().any(|s| line.contains(s)) {
        return ResponseLine::Sentinel;
    }
    match parse_record(line) {
        Some(record) => ResponseLine::Record(record),
        None => ResponseLine::Noise,
    }
}

fn parse_record(line: &str) -> Option<ProcessedRecord> {
    let mut fields = line.split(',').map(str::trim);
    let index = fields.next()?;
    let input = fields.next()?.parse::<u16>().ok()?;
    let output = fields.next()?.parse::<u16>().ok()?;

    Some(ProcessedRecord {
        index: index.parse().ok(),
        input,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(Command::Test.to_line(), "t");
        assert_eq!(Command::Reset.to_line(), "r");
        assert_eq!(Command::Capture.to_line(), "c");
        assert_eq!(Command::RequestSend.to_line(), "s");
        assert_eq!(Command::SelectFilter(FilterMode::Bypass).to_line(), "0");
        assert_eq!(Command::SelectFilter(FilterMode::Fir).to_line(), "1");
        assert_eq!(Command::SelectFilter(FilterMode::Iir).to_line(), "2");
    }

    #[test]
    fn test_encode_sample() {
        assert_eq!(encode_sample(Sample::new(0).unwrap()), "DATA:0");
        assert_eq!(encode_sample(Sample::new(1023).unwrap()), "DATA:1023");
    }

    #[test]
    fn test_classify_header() {
        assert_eq!(classify("index,input,output"), ResponseLine::Header);
        assert_eq!(classify("  index,input,output\r"), ResponseLine::Header);
    }

    #[test]
    fn test_classify_sentinels() {
        assert_eq!(classify("FIN_DATOS"), ResponseLine::Sentinel);
        assert_eq!(classify("=== ENVÍO COMPLETADO ==="), ResponseLine::Sentinel);
        assert_eq!(classify("ENVIO COMPLETADO"), ResponseLine::Sentinel);
    }

    #[test]
    fn test_classify_record() {
        assert_eq!(
            classify("17,512,498"),
            ResponseLine::Record(ProcessedRecord {
                index: Some(17),
                input: 512,
                output: 498
            })
        );
        // Extra fields are ignored, a non-numeric index is tolerated
        assert_eq!(
            classify("x, 3, 4, 99"),
            ResponseLine::Record(ProcessedRecord {
                index: None,
                input: 3,
                output: 4
            })
        );
    }

    #[test]
    fn test_classify_noise() {
        assert_eq!(classify("Filtro FIR activado"), ResponseLine::Noise);
        assert_eq!(classify("12,51"), ResponseLine::Noise);
        assert_eq!(classify("12,abc,40"), ResponseLine::Noise);
        assert_eq!(classify(""), ResponseLine::Noise);
        assert_eq!(classify("1,-4,7"), ResponseLine::Noise);
    }
}
