use std::path::PathBuf;
use std::sync::Arc;

use pseudodpms::{AppError, Direction, GpioLine, MockSysfsBackend};

fn backend() -> Arc<MockSysfsBackend> {
    Arc::new(MockSysfsBackend::default())
}

#[test]
fn pin_path_derives_from_pin_number() {
    let backend = backend();
    for pin in [0, 7, 42, 511] {
        let line = GpioLine::new(backend.clone(), pin, Direction::In);
        assert_eq!(
            line.pin_path(),
            PathBuf::from(format!("/sys/class/gpio/gpio{pin}"))
        );
    }
}

#[test]
fn wanted_direction_defaults_to_input() {
    assert_eq!(Direction::default(), Direction::In);
    assert_eq!("out\n".parse::<Direction>().unwrap(), Direction::Out);
    assert!("sideways".parse::<Direction>().is_err());
}

#[test]
fn reconfigure_direction_writes_only_once() {
    let backend = backend();
    backend.preexport(4, Direction::In);
    let line = GpioLine::new(backend.clone(), 4, Direction::In);

    line.reconfigure_direction(Some(Direction::Out), false).unwrap();
    line.reconfigure_direction(Some(Direction::Out), false).unwrap();

    assert_eq!(backend.direction(4), Some(Direction::Out));
    assert_eq!(backend.direction_writes(4), vec!["out".to_string()]);
    assert_eq!(line.wanted_direction(), Direction::Out);
}

#[test]
fn output_is_not_turned_into_input_without_override() {
    let backend = backend();
    backend.preexport(4, Direction::Out);
    let line = GpioLine::new(backend.clone(), 4, Direction::Out);

    let refused = line.reconfigure_direction(Some(Direction::In), false);
    assert!(matches!(refused, Err(AppError::DirectionRefused(_))));
    assert_eq!(backend.direction(4), Some(Direction::Out));
    assert_eq!(line.wanted_direction(), Direction::Out);
    assert!(backend.direction_writes(4).is_empty());

    line.reconfigure_direction(Some(Direction::In), true).unwrap();
    assert_eq!(backend.direction(4), Some(Direction::In));
    assert_eq!(line.wanted_direction(), Direction::In);
}

#[test]
fn reconfigure_without_direction_reasserts_wanted() {
    let backend = backend();
    backend.preexport(8, Direction::In);
    let line = GpioLine::new(backend.clone(), 8, Direction::Out);

    line.reconfigure_direction(None, false).unwrap();
    assert_eq!(backend.direction(8), Some(Direction::Out));
}

#[test]
fn reconfigure_on_unexported_line_is_an_io_error() {
    let line = GpioLine::new(backend(), 3, Direction::Out);
    assert!(matches!(
        line.reconfigure_direction(None, true),
        Err(AppError::Io { .. })
    ));
}

#[test]
fn claim_exports_and_sets_direction_once() {
    let backend = backend();
    let line = GpioLine::new(backend.clone(), 17, Direction::Out);
    assert!(!line.is_exported());

    line.claim_or_reexport().unwrap();
    line.claim_or_reexport().unwrap();

    assert!(line.is_exported());
    assert_eq!(backend.export_count(17), 1);
    assert_eq!(backend.direction_writes(17), vec!["out".to_string()]);
}

#[test]
fn claim_restores_direction_after_external_unexport() {
    let backend = backend();
    let line = GpioLine::new(backend.clone(), 17, Direction::Out);
    line.claim_or_reexport().unwrap();

    line.unexport().unwrap();
    assert!(!backend.is_exported(17));

    line.claim_or_reexport().unwrap();
    assert_eq!(backend.export_count(17), 2);
    assert_eq!(backend.direction(17), Some(Direction::Out));
}

#[test]
fn claim_forces_input_back_over_output() {
    let backend = backend();
    backend.preexport(5, Direction::Out);
    let line = GpioLine::new(backend.clone(), 5, Direction::In);

    line.claim_or_reexport().unwrap();
    assert_eq!(backend.direction(5), Some(Direction::In));
}

#[test]
fn claim_fails_when_export_fails() {
    let backend = backend();
    backend.fail_exports(true);
    let line = GpioLine::new(backend.clone(), 9, Direction::Out);

    assert!(matches!(line.claim_or_reexport(), Err(AppError::Io { .. })));
    assert!(!line.is_exported());
}

#[test]
fn export_and_unexport_are_idempotent() {
    let backend = backend();
    let line = GpioLine::new(backend.clone(), 21, Direction::In);

    line.unexport().unwrap();
    assert_eq!(backend.unexport_count(21), 0);

    line.export().unwrap();
    line.export().unwrap();
    assert_eq!(backend.export_count(21), 1);

    line.unexport().unwrap();
    line.unexport().unwrap();
    assert_eq!(backend.unexport_count(21), 1);
}

#[test]
fn logic_level_reads_and_writes() {
    let backend = backend();
    let line = GpioLine::new(backend.clone(), 6, Direction::Out);
    line.claim_or_reexport().unwrap();

    assert!(!line.read_logic_level().unwrap());
    line.write_logic_level(true).unwrap();
    assert!(line.read_logic_level().unwrap());
    assert_eq!(backend.level(6), Some(true));
    line.write_logic_level(false).unwrap();
    assert_eq!(backend.level(6), Some(false));
}

#[test]
fn writing_an_input_line_fails() {
    let backend = backend();
    let line = GpioLine::new(backend.clone(), 5, Direction::In);
    line.claim_or_reexport().unwrap();

    assert!(matches!(
        line.write_logic_level(true),
        Err(AppError::Io { .. })
    ));

    backend.set_level(5, true);
    assert!(line.read_logic_level().unwrap());
}

#[test]
fn unexported_line_cannot_be_read_or_written() {
    let line = GpioLine::new(backend(), 30, Direction::Out);
    assert!(matches!(line.read_logic_level(), Err(AppError::Io { .. })));
    assert!(matches!(
        line.write_logic_level(true),
        Err(AppError::Io { .. })
    ));
}

#[test]
fn shared_handles_see_the_same_line() {
    let backend = backend();
    let toggle = Arc::new(GpioLine::new(backend.clone(), 12, Direction::Out));
    let sense = toggle.clone();
    toggle.claim_or_reexport().unwrap();

    toggle.write_logic_level(true).unwrap();
    assert!(sense.read_logic_level().unwrap());

    toggle
        .reconfigure_direction(Some(Direction::In), true)
        .unwrap();
    assert_eq!(sense.wanted_direction(), Direction::In);
}

#[test]
fn check_configuration_compares_wanted_and_hardware() {
    let backend = backend();
    let line = GpioLine::new(backend.clone(), 2, Direction::Out);
    assert_eq!(line.check_configuration(), None);

    backend.preexport(2, Direction::In);
    assert_eq!(line.check_configuration(), Some(false));

    line.claim_or_reexport().unwrap();
    assert_eq!(line.check_configuration(), Some(true));

    let status = line.status();
    assert!(status.exported);
    assert_eq!(status.direction, Some(Direction::Out));
    assert_eq!(status.direction_matches, Some(true));
}
