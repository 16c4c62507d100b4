use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_filterlink"))
}

fn tmp_path(name: &str) -> PathBuf {
    let tmp_dir = PathBuf::from("tmp");
    fs::create_dir_all(&tmp_dir).ok();
    tmp_dir.join(name)
}

/// Stereo 44.1 kHz test tone: 440 Hz plus a 3 kHz component the filters attenuate
fn create_test_wav(name: &str, seconds: f32) -> PathBuf {
    let path = tmp_path(name);
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("Failed to create test WAV");
    let frames = (44_100.0 * seconds) as usize;
    for i in 0..frames {
        let t = i as f32 / 44_100.0;
        let value = 0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            + 0.3 * (2.0 * std::f32::consts::PI * 3000.0 * t).sin();
        let sample = (value * 32767.0) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn run_filterlink(args: &[&str]) -> Output {
    Command::new(binary())
        .args(args)
        .output()
        .expect("Failed to execute filterlink")
}

fn combined_output(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string() + &String::from_utf8_lossy(&output.stdout)
}

#[test]
fn test_process_simulated_writes_device_rate_wav() {
    let input = create_test_wav("process_input.wav", 0.25);
    let output = tmp_path("process_output.wav");

    let result = run_filterlink(&[
        "process",
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--filter",
        "fir",
        "--simulate",
    ]);
    let text = combined_output(&result);
    assert!(result.status.success(), "process failed: {}", text);
    assert!(text.contains("4/4 successful"), "unexpected summary: {}", text);

    let reader = hound::WavReader::open(&output).expect("Output WAV not readable");
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 8000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    // 0.25 s at 8 kHz
    assert_eq!(reader.len(), 2000);
}

#[test]
fn test_process_report_counts_dropout() {
    let input = create_test_wav("dropout_input.wav", 0.25);
    let output = tmp_path("dropout_output.wav");
    let report = tmp_path("dropout_report.json");

    let result = run_filterlink(&[
        "process",
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--filter",
        "iir",
        "--simulate",
        "--simulate-silent-batch",
        "1",
        "--report",
        report.to_str().unwrap(),
    ]);
    assert!(result.status.success(), "process failed: {}", combined_output(&result));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).expect("Report not written")).unwrap();
    assert_eq!(json["filter"], "iir");
    assert_eq!(json["samples"], 2000);
    assert_eq!(json["total_batches"], 4);
    assert_eq!(json["successful_batches"], 3);
    assert_eq!(json["success_ratio"], 0.75);
    assert_eq!(json["handshake_confirmed"], true);
    let batches = json["batches"].as_array().unwrap();
    assert_eq!(batches.len(), 4);
    assert_eq!(batches[1]["collected"], 0);
    assert_eq!(batches[3]["len"], 200);
}

#[test]
fn test_compare_lists_every_filter() {
    let input = create_test_wav("compare_input.wav", 0.1);
    let result = run_filterlink(&["compare", input.to_str().unwrap(), "--simulate"]);
    let text = String::from_utf8_lossy(&result.stdout).to_string();

    assert!(result.status.success(), "compare failed: {}", combined_output(&result));
    for mode in ["bypass", "fir", "iir"] {
        assert!(text.contains(mode), "missing {} row: {}", mode, text);
    }
    assert!(text.contains("100.0%"));
}

#[test]
fn test_probe_simulated_board() {
    let result = run_filterlink(&["probe", "--simulate"]);
    let text = String::from_utf8_lossy(&result.stdout).to_string();

    assert!(result.status.success(), "probe failed: {}", combined_output(&result));
    assert!(text.contains("confirmed (COMUNICACIÓN OK)"), "got: {}", text);
    assert!(text.contains("Filtro BYPASS activado"));
    assert!(text.contains("Filtro FIR activado"));
    assert!(text.contains("Filtro IIR activado"));
}

#[test]
fn test_missing_port_fails_cleanly() {
    let input = create_test_wav("no_port_input.wav", 0.05);
    let output = tmp_path("no_port_output.wav");
    let result = run_filterlink(&[
        "process",
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--port",
        "/dev/filterlink-does-not-exist",
    ]);

    assert!(!result.status.success());
    assert!(
        combined_output(&result).contains("unavailable"),
        "expected link error, got: {}",
        combined_output(&result)
    );
    assert!(!output.exists());
}

#[test]
fn test_missing_input_file() {
    let result = run_filterlink(&["process", "tmp/nope.wav", "tmp/nope_out.wav", "--simulate"]);
    assert!(!result.status.success());
}

#[test]
fn test_invalid_batch_size_rejected() {
    let input = create_test_wav("bad_batch_input.wav", 0.05);
    let output = tmp_path("bad_batch_output.wav");
    let result = run_filterlink(&[
        "process",
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--simulate",
        "--batch-size",
        "700",
    ]);
    assert!(!result.status.success());
    assert!(combined_output(&result).contains("batch"));
}

#[cfg(unix)]
#[test]
fn test_interrupt_keeps_collected_batches() {
    let input = create_test_wav("interrupt_input.wav", 3.0);
    let output = tmp_path("interrupt_output.wav");
    let _ = fs::remove_file(&output);

    // 24000 samples paced at 1 ms each would take well over 20 s
    let child = Command::new(binary())
        .args([
            "process",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
            "--simulate",
            "--pacing-ms",
            "1",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start filterlink");

    std::thread::sleep(std::time::Duration::from_millis(1500));
    let pid = child.id().to_string();
    let status = Command::new("kill")
        .args(["-INT", pid.as_str()])
        .status()
        .expect("Failed to send SIGINT");
    assert!(status.success());

    let result = child.wait_with_output().unwrap();
    let text = combined_output(&result);
    assert!(result.status.success(), "interrupted run failed: {}", text);
    assert!(text.contains("Session cancelled"), "got: {}", text);

    let reader = hound::WavReader::open(&output).expect("Partial output not written");
    assert!(reader.len() < 24_000);
    assert_eq!(reader.len() % 600, 0);
}
