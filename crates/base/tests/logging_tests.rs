use {
    base::logging::{FileLogger, StdoutLogger, format_today},
    log::Log,
    std::fs,
};

fn record_for<'a>(args: std::fmt::Arguments<'a>) -> log::Record<'a> {
    log::RecordBuilder::new()
        .level(log::Level::Warn)
        .target("logging_tests")
        .file(Some("logging_tests.rs"))
        .line(Some(7))
        .args(args)
        .build()
}

#[test]
fn test_stdout_logger_accepts_records() {
    let logger = StdoutLogger;
    let metadata = log::MetadataBuilder::new()
        .level(log::Level::Debug)
        .target("logging_tests")
        .build();
    assert!(logger.enabled(&metadata));
    logger.log(&record_for(format_args!("stdout line")));
    logger.flush();
}

#[test]
fn test_file_logger_writes_formatted_line() {
    let dir = std::env::temp_dir().join(format!("base-log-write-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);

    let logger = FileLogger::new(&dir).expect("Failed to create FileLogger");
    logger.log(&record_for(format_args!("workload busy")));
    logger.flush();

    let content = fs::read_to_string(dir.join(format!("{}.log", format_today()))).unwrap();
    assert!(content.contains("[WARN]"));
    assert!(content.contains("[logging_tests]"));
    assert!(content.contains("logging_tests.rs:7 - workload busy"));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_file_logger_appends() {
    let dir = std::env::temp_dir().join(format!("base-log-append-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);

    let logger = FileLogger::new(&dir).unwrap();
    logger.log(&record_for(format_args!("first")));
    logger.log(&record_for(format_args!("second")));
    logger.flush();

    let content = fs::read_to_string(dir.join(format!("{}.log", format_today()))).unwrap();
    assert_eq!(content.lines().count(), 2);

    fs::remove_dir_all(&dir).ok();
}
