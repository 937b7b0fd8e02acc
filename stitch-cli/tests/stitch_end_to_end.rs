use std::fs;
use std::path::Path;
use std::process::Command;

use clap::Parser;
use stitch_cli::cli_args::Opt;
use stitch_cli::runner::stitch;
use stitch_codecs::StitchError;

const PATTERN_PGM: &[u8] = b"P5\n2 2\n255\n\x00\x40\x80\xff";

fn opt(dir: &Path, first: &[u8], second: &[u8], extra: &[&str]) -> Opt {
    let input1 = dir.join("one.bin");
    let input2 = dir.join("two.bin");
    fs::write(&input1, first).unwrap();
    fs::write(&input2, second).unwrap();
    let template = dir.join("frame-%03d.pgm");

    let mut args = vec![
        "stitch".to_string(),
        input1.display().to_string(),
        input2.display().to_string(),
        template.display().to_string(),
        "--codec".to_string(),
        "mock".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    Opt::try_parse_from(args).unwrap()
}

fn written(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".pgm"))
        .collect();
    names.sort();
    names
}

#[test]
fn two_single_unit_inputs_write_one_file_each() {
    let dir = tempfile::tempdir().unwrap();
    let report = stitch(&opt(dir.path(), &[0; 4096], &[0; 4096], &[])).unwrap();

    assert_eq!(report.frames_written(), 2);
    assert_eq!(written(dir.path()), vec!["frame-1-000.pgm", "frame-2-000.pgm"]);
    for name in written(dir.path()) {
        assert_eq!(fs::read(dir.path().join(name)).unwrap(), PATTERN_PGM);
    }
}

#[test]
fn empty_input_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let report = stitch(&opt(dir.path(), &[0; 8192], &[], &[])).unwrap();
    assert_eq!(report.rounds, 0);
    assert!(written(dir.path()).is_empty());
}

#[test]
fn alternate_policy_over_several_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let extra = ["--policy", "alternate", "--chunk-size", "64", "--mock-frame-bytes", "32"];
    let report = stitch(&opt(dir.path(), &[0; 256], &[0; 256], &extra)).unwrap();

    // Four rounds of two frames per stream; each stream is written every other round.
    assert_eq!(report.rounds, 4);
    assert_eq!(
        written(dir.path()),
        vec![
            "frame-1-000.pgm",
            "frame-1-001.pgm",
            "frame-1-002.pgm",
            "frame-1-003.pgm",
            "frame-2-000.pgm",
            "frame-2-001.pgm",
            "frame-2-002.pgm",
            "frame-2-003.pgm",
        ]
    );
}

#[test]
fn missing_input_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut opt = opt(dir.path(), &[0; 16], &[0; 16], &[]);
    opt.input2 = dir.path().join("does-not-exist.bin");

    let err = stitch(&opt).unwrap_err();
    assert!(format!("{err:#}").contains("does-not-exist.bin"), "{err:#}");
    assert!(matches!(
        err.downcast_ref::<StitchError>(),
        Some(StitchError::ResourceUnavailable { .. })
    ));
}

#[test]
fn corrupt_chunk_aborts_or_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut second = vec![0u8; 96];
    second[32] = 0xEE;
    let extra = ["--chunk-size", "32", "--mock-frame-bytes", "32"];

    let err = stitch(&opt(dir.path(), &[0; 96], &second, &extra)).unwrap_err();
    assert!(err.to_string().contains("stream 2"), "{err}");

    let dir = tempfile::tempdir().unwrap();
    let extra = ["--chunk-size", "32", "--mock-frame-bytes", "32", "--on-decode-error", "skip"];
    let report = stitch(&opt(dir.path(), &[0; 96], &second, &extra)).unwrap();
    assert_eq!(report.frames_written(), 5);
    assert!(dir.path().join("frame-2-001.pgm").exists());
    assert!(!dir.path().join("frame-2-002.pgm").exists());
}

#[test]
fn binary_exit_codes() {
    let exe = env!("CARGO_BIN_EXE_stitch");

    let missing = Command::new(exe).arg("only-one.bin").output().unwrap();
    assert_eq!(missing.status.code(), Some(1));
    assert!(!missing.stderr.is_empty());

    let help = Command::new(exe).arg("--help").output().unwrap();
    assert_eq!(help.status.code(), Some(0));

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bin");
    fs::write(&input, [0u8; 4096]).unwrap();
    let template = dir.path().join("f-%d.pgm");
    let ok = Command::new(exe)
        .arg(&input)
        .arg(&input)
        .arg(&template)
        .args(["--codec", "mock", "--summary-json"])
        .output()
        .unwrap();
    assert_eq!(ok.status.code(), Some(0));
    let summary: serde_json::Value = serde_json::from_slice(&ok.stdout).unwrap();
    assert_eq!(summary["streams"][0]["frames_emitted"], 1);
    assert!(dir.path().join("f-1-0.pgm").exists());
    assert!(dir.path().join("f-2-0.pgm").exists());

    let bad_template = Command::new(exe)
        .arg(&input)
        .arg(&input)
        .arg(dir.path().join("no-placeholder.pgm"))
        .args(["--codec", "mock"])
        .output()
        .unwrap();
    assert_eq!(bad_template.status.code(), Some(1));
}
