use nanowrite::dispatcher;
use nanowrite::platforms::mock::{Echo, MockApp, MockCall};
use nanowrite::{
    BatchJob, Config, ControlName, CoordinateTable, JobState, KeyCombo, NanoWrite,
    NanoWriteError, Point, Rgb, RetryPolicy, Session, StructureBatch,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn fast_config(work_dir: Option<PathBuf>) -> Config {
    Config {
        profile: Some("1.7.5".to_string()),
        debounce: 2,
        poll: RetryPolicy::new(0, 20, 5_000),
        verify: RetryPolicy::new(0, 5, 5_000),
        settle_ms: 0,
        move_settle_ms: 0,
        work_dir,
        ..Config::default()
    }
}

fn open_session(app: &MockApp, config: Config) -> Session {
    Session::open(Box::new(app.driver()), Box::new(app.screen()), config).unwrap()
}

fn connect(app: &MockApp) -> NanoWrite {
    NanoWrite::from_session(open_session(app, fast_config(None)))
}

fn at(control: ControlName) -> Point {
    CoordinateTable::builtin("1.7.5").unwrap().point(control).unwrap()
}

fn input_calls(app: &MockApp) -> Vec<MockCall> {
    app.calls().into_iter().filter(MockCall::is_input).collect()
}

#[test]
fn test_load_structure_timeout_leaves_job_state_alone() {
    let app = MockApp::default();
    app.script_log(["[12:00:00] ready"]);
    let mut session = open_session(&app, fast_config(None));

    let result = dispatcher::load_structure_file(&mut session, Path::new("x.gwl"));

    assert!(matches!(result, Err(NanoWriteError::VerificationTimeout(_))));
    assert_eq!(session.tracker().state(), JobState::Unknown);
    assert!(session.tracker().active_job().is_none());
    assert!(app.calls().contains(&MockCall::FillDialog {
        title: "Open file".to_string(),
        text: "x.gwl".to_string(),
    }));
}

#[test]
fn test_load_structure_file_waits_for_done() {
    let app = MockApp::default();
    app.script_log(["[11:59:00] ready"]);
    app.echo_on_key(KeyCombo::Enter, Echo::DialogText, ["[12:00:05] done."]);
    let nw = connect(&app);

    assert_eq!(
        nw.load_structure_file(Path::new("C:\\jobs\\x.gwl")).unwrap(),
        JobState::Finished
    );
    let inputs = input_calls(&app);
    assert_eq!(inputs[0], MockCall::Click(at(ControlName::LoadStructure)));
    assert_eq!(*inputs.last().unwrap(), MockCall::Press(KeyCombo::Enter));
}

#[test]
fn test_set_z_inversion_is_idempotent() {
    let app = MockApp::default();
    let pixel = at(ControlName::ZInversionPixel);
    app.toggle_on_click(pixel, Rgb::new(30, 30, 30), Rgb::new(20, 200, 20));
    let nw = connect(&app);

    nw.set_z_inversion(false).unwrap();
    assert!(input_calls(&app).is_empty());
    assert!(!nw.get_z_inversion().unwrap());

    nw.set_z_inversion(true).unwrap();
    assert!(nw.get_z_inversion().unwrap());
    assert_eq!(input_calls(&app), vec![MockCall::Click(pixel)]);

    app.clear_calls();
    nw.set_z_inversion(true).unwrap();
    assert!(input_calls(&app).is_empty());
}

#[test]
fn test_set_z_inversion_times_out_when_toggle_ignores_click() {
    let app = MockApp::default();
    app.set_pixel(at(ControlName::ZInversionPixel), Rgb::new(0, 0, 0));
    let nw = connect(&app);

    assert!(matches!(
        nw.set_z_inversion(true),
        Err(NanoWriteError::VerificationTimeout(_))
    ));
}

fn progress_and_abort_app() -> MockApp {
    let app = MockApp::default();
    app.script_log(["[12:00:00] Job aborted."]);
    app.script_field(at(ControlName::ProgressField), ["00:01:00"]);
    app.script_field(at(ControlName::ProgressEstimateField), ["00:10:00"]);
    app
}

#[test]
fn test_concurrent_abort_and_progress_do_not_interleave() {
    let abort_alone = {
        let app = progress_and_abort_app();
        assert_eq!(connect(&app).abort_job().unwrap(), JobState::Aborted);
        app.calls()
    };
    let progress_alone = {
        let app = progress_and_abort_app();
        connect(&app).get_progress().unwrap();
        app.calls()
    };

    let app = progress_and_abort_app();
    let nw = Arc::new(connect(&app));
    let aborter = {
        let nw = Arc::clone(&nw);
        std::thread::spawn(move || nw.abort_job())
    };
    let reader = {
        let nw = Arc::clone(&nw);
        std::thread::spawn(move || nw.get_progress())
    };
    assert_eq!(aborter.join().unwrap().unwrap(), JobState::Aborted);
    let progress = reader.join().unwrap().unwrap();
    assert_eq!(progress.fraction, Some(0.1));

    let calls = app.calls();
    let abort_first = [abort_alone.clone(), progress_alone.clone()].concat();
    let progress_first = [progress_alone, abort_alone].concat();
    assert!(calls == abort_first || calls == progress_first);
}

#[test]
fn test_execute_gwl_submits_and_tracks_job() {
    let app = MockApp::default();
    app.echo_on_click(at(ControlName::GwlSubmit), Echo::PastedMessages, ["[12:00:02] done."]);
    let nw = connect(&app);

    assert_eq!(nw.execute_gwl_and_wait("PiezoGotoX 10").unwrap(), JobState::Finished);

    let inputs = input_calls(&app);
    assert_eq!(
        inputs[..7],
        [
            MockCall::Click(at(ControlName::AdvancedSettingsTab)),
            MockCall::Click(at(ControlName::GwlConsole)),
            MockCall::Press(KeyCombo::CtrlEnd),
            MockCall::Press(KeyCombo::ShiftCtrlHome),
            MockCall::Press(KeyCombo::Delete),
            MockCall::Paste(
                "MessageOut ***Separator*** #1#\nPiezoGotoX 10\nwait 0.01".to_string()
            ),
            MockCall::Click(at(ControlName::GwlSubmit)),
        ]
    );
    assert!(inputs.contains(&MockCall::Click(at(ControlName::CameraTab))));

    let command_log = nw.get_command_log().unwrap();
    assert_eq!(command_log.len(), 2);
    assert_eq!(command_log[1].message, "done.");
}

#[test]
fn test_execute_gwl_without_submit() {
    let app = MockApp::default();
    let mut session = open_session(&app, fast_config(None));

    dispatcher::execute_gwl(&mut session, "write", false, true).unwrap();

    assert!(!app.calls().contains(&MockCall::Click(at(ControlName::GwlSubmit))));
    assert!(session.tracker().active_job().is_none());
}

#[test]
fn test_execute_gwl_error_is_reported() {
    let app = MockApp::default();
    app.echo_on_click(
        at(ControlName::GwlSubmit),
        Echo::PastedMessages,
        ["[12:00:02] !!! Unknown command: PiezoGotoW"],
    );
    let nw = connect(&app);

    assert!(matches!(
        nw.execute_gwl_and_wait("PiezoGotoW 1"),
        Err(NanoWriteError::ExecutionError(msg)) if msg.contains("PiezoGotoW")
    ));
}

#[test]
fn test_running_job_blocks_new_structure() {
    let app = MockApp::default();
    app.echo_on_click(at(ControlName::GwlSubmit), Echo::PastedMessages, ["[12:00:02] moving"]);
    let nw = connect(&app);

    nw.execute_gwl("PiezoGotoX 10", true).unwrap();
    assert!(matches!(
        nw.load_structure_file(Path::new("x.gwl")),
        Err(NanoWriteError::NotReady(_))
    ));
}

#[test]
fn test_structure_batch_runs_jobs_and_reads_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("out.txt"), "result").unwrap();

    let app = MockApp::default();
    app.echo_on_key(KeyCombo::Enter, Echo::DialogText, ["[12:00:01] done."]);
    app.echo_on_click(
        at(ControlName::StartDlw),
        Echo::DialogFileMessages,
        ["[12:00:02] done."],
    );
    let nw = NanoWrite::from_session(open_session(
        &app,
        fast_config(Some(dir.path().to_path_buf())),
    ));

    let batch = StructureBatch {
        files: BTreeMap::from([("sub/job.gwl".to_string(), "PiezoGotoX 1\nwrite".to_string())]),
        jobs: vec![BatchJob {
            start: "sub/job.gwl".to_string(),
            readback: vec!["out.txt".to_string()],
        }],
    };
    let results = nw.load_structure_batch(&batch).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].state, JobState::Finished);
    assert_eq!(results[0].artifacts["out.txt"], b"result".to_vec());

    let written = std::fs::read_to_string(dir.path().join("job.gwl")).unwrap();
    assert!(written.starts_with("MessageOut ***Separator*** #1#\nPiezoGotoX 1"));
    assert!(!dir.path().join("sub").exists());
}

#[test]
fn test_batch_job_without_file_is_rejected() {
    let app = MockApp::default();
    let nw = connect(&app);
    let batch = StructureBatch {
        files: BTreeMap::new(),
        jobs: vec![BatchJob {
            start: "missing.gwl".to_string(),
            readback: Vec::new(),
        }],
    };

    assert!(matches!(
        nw.load_structure_batch(&batch),
        Err(NanoWriteError::InvalidArgument(_))
    ));
    assert!(app.calls().is_empty());
}

#[test]
fn test_camera_image_reads_picture_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("captured.tif"), [0x49u8, 0x49, 0x2a, 0x00]).unwrap();
    std::fs::write(dir.path().join("captured.tif_meta.txt"), "Exposure: 20 ms").unwrap();

    let app = MockApp::default();
    app.echo_on_click(at(ControlName::GwlSubmit), Echo::PastedMessages, ["[12:00:03] done."]);
    let nw = NanoWrite::from_session(open_session(
        &app,
        fast_config(Some(dir.path().to_path_buf())),
    ));

    let frame = nw.get_camera_image().unwrap();
    assert_eq!(frame.data, vec![0x49, 0x49, 0x2a, 0x00]);
    assert_eq!(frame.metadata, "Exposure: 20 ms");
    assert!(app.calls().iter().any(
        |c| matches!(c, MockCall::Paste(script) if script.contains("CapturePhoto"))
    ));
}

#[test]
fn test_piezo_position_mirrors_and_caches() {
    let app = MockApp::default();
    app.script_field(at(ControlName::PiezoXField), ["10"]);
    app.script_field(at(ControlName::PiezoYField), ["20"]);
    app.script_field(at(ControlName::PiezoZField), ["30.5"]);
    app.set_pixel(at(ControlName::ZInversionPixel), Rgb::new(0, 180, 0));
    let nw = connect(&app);

    let position = nw.get_piezo_position().unwrap();
    assert_eq!((position.x, position.y, position.z), (290.0, 20.0, 269.5));

    let reads = app.calls().len();
    assert_eq!(nw.get_piezo_position().unwrap(), position);
    assert_eq!(app.calls().len(), reads);
}

#[test]
fn test_piezo_field_garbage_is_a_parse_failure() {
    let app = MockApp::default();
    app.script_field(at(ControlName::PiezoXField), ["1O.5"]);
    let nw = connect(&app);

    assert!(matches!(
        nw.get_piezo_position(),
        Err(NanoWriteError::ParseFailure(_))
    ));
}

#[test]
fn test_progress_without_estimate() {
    let app = MockApp::default();
    app.script_field(at(ControlName::ProgressField), ["", "00:02:30"]);
    let nw = connect(&app);

    let progress = nw.get_progress().unwrap();
    assert_eq!(progress.elapsed.as_secs(), 150);
    assert_eq!(progress.estimated_total, None);
    assert_eq!(progress.fraction, None);
    assert!(app.calls().contains(&MockCall::Click(at(ControlName::GraphTab))));
}

#[test]
fn test_closed_window_is_unavailable() {
    let app = MockApp::default();
    let nw = connect(&app);
    app.set_available(false);

    assert!(matches!(nw.get_log(), Err(NanoWriteError::TargetUnavailable(_))));
}

#[test]
fn test_piezo_range_check() {
    let app = MockApp::default();
    let nw = connect(&app);

    assert_eq!(nw.piezo_range(), (300.0, 300.0, 300.0));
    assert!(nw.is_within_piezo_range(&nanowrite::PiezoPosition { x: 0.0, y: 150.0, z: 300.0 }));
    assert!(!nw.is_within_piezo_range(&nanowrite::PiezoPosition { x: -1.0, y: 0.0, z: 0.0 }));
}

#[test]
fn test_stale_marker_in_log_does_not_verify_submission() {
    let app = MockApp::default();
    // left behind by an earlier session; the submit click is never processed
    app.script_log(["[11:00:00] ***Separator*** #1#\n[11:00:01] done."]);
    let mut session = open_session(&app, fast_config(None));

    let result = dispatcher::execute_gwl(&mut session, "PiezoGotoX 10", true, true);

    assert!(matches!(result, Err(NanoWriteError::VerificationTimeout(_))));
    assert!(session.tracker().active_job().is_none());
    assert_eq!(session.tracker().state(), JobState::Unknown);
}

#[test]
fn test_repeated_marker_verifies_new_submission() {
    let app = MockApp::default();
    app.script_log(["[11:00:00] ***Separator*** #1#\n[11:00:01] done."]);
    app.echo_on_click(at(ControlName::GwlSubmit), Echo::PastedMessages, ["[12:00:02] moving"]);
    let nw = connect(&app);

    nw.execute_gwl("PiezoGotoX 10", true).unwrap();
    let status = nw.get_job_status().unwrap();
    assert_eq!(status.state, JobState::Running);
}

#[test]
fn test_oversized_progress_field_is_a_parse_failure() {
    let app = MockApp::default();
    app.script_field(at(ControlName::ProgressField), ["99999999999999999999:00:00"]);
    let nw = connect(&app);

    assert!(matches!(nw.get_progress(), Err(NanoWriteError::ParseFailure(_))));
    let status = nw.get_job_status().unwrap();
    assert_eq!(status.elapsed, None);
}

#[test]
fn test_invalidated_piezo_position_is_read_again() {
    let app = MockApp::default();
    app.script_field(at(ControlName::PiezoXField), ["10", "42"]);
    app.script_field(at(ControlName::PiezoYField), ["20"]);
    app.script_field(at(ControlName::PiezoZField), ["30"]);
    let nw = connect(&app);

    assert_eq!(nw.get_piezo_position().unwrap().x, 10.0);
    assert_eq!(nw.get_piezo_position().unwrap().x, 10.0);

    nw.invalidate_piezo_position();
    assert_eq!(nw.get_piezo_position().unwrap().x, 42.0);
}

#[test]
fn test_piezo_move_compensated_by_stage() {
    let app = MockApp::default();
    app.script_field(at(ControlName::PiezoXField), ["100"]);
    app.script_field(at(ControlName::PiezoYField), ["100"]);
    app.script_field(at(ControlName::PiezoZField), ["50"]);
    app.echo_on_click(at(ControlName::GwlSubmit), Echo::PastedMessages, ["[12:00:02] done."]);
    let nw = connect(&app);

    nw.move_piezo_to_same_location_by_stage(120.0, 90.0).unwrap();

    let pastes: Vec<String> = app
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            MockCall::Paste(script) => Some(script),
            _ => None,
        })
        .collect();
    assert_eq!(
        pastes,
        vec![
            "MessageOut ***Separator*** #1#\n120.000000 90.000000 50.000000 0\nwrite\nwait 0.01"
                .to_string(),
            "MessageOut ***Separator*** #2#\nMoveStageX -20.000000\nMoveStageY 10.000000\n\
             AddZDrivePosition 0.000000\nwrite\nwait 0.01"
                .to_string(),
        ]
    );

    let reads = app.calls().len();
    let position = nw.get_piezo_position().unwrap();
    assert_eq!((position.x, position.y, position.z), (120.0, 90.0, 50.0));
    assert_eq!(app.calls().len(), reads);
}

#[test]
fn test_wait_for_job_gives_up_with_unknown() {
    let app = MockApp::default();
    app.echo_on_click(at(ControlName::GwlSubmit), Echo::PastedMessages, ["[12:00:02] moving"]);
    let nw = connect(&app);

    nw.execute_gwl("PiezoGotoX 10", true).unwrap();
    assert_eq!(nw.wait_for_job().unwrap(), JobState::Unknown);
    assert_eq!(nw.get_job_status().unwrap().state, JobState::Running);
}

#[test]
fn test_find_interface_without_end_is_ambiguous() {
    let app = MockApp::default();
    app.echo_on_click(
        at(ControlName::GwlSubmit),
        Echo::PastedMessages,
        ["[12:00:02] searching interface"],
    );
    let nw = connect(&app);

    assert!(matches!(
        nw.find_interface(50.0),
        Err(NanoWriteError::AmbiguousState(_))
    ));
}

#[test]
fn test_new_job_forgets_previous_estimate() {
    let app = MockApp::default();
    app.script_field(at(ControlName::ProgressField), ["00:01:00"]);
    app.script_field(at(ControlName::ProgressEstimateField), ["00:10:00"]);
    app.echo_on_click(at(ControlName::GwlSubmit), Echo::PastedMessages, ["[12:00:02] moving"]);
    let nw = connect(&app);

    nw.get_progress().unwrap();
    let status = nw.get_job_status().unwrap();
    assert_eq!(status.estimated_total.map(|d| d.as_secs()), Some(600));
    assert_eq!(status.progress_fraction, Some(0.1));

    nw.execute_gwl("PiezoGotoX 10", true).unwrap();
    let status = nw.get_job_status().unwrap();
    assert_eq!(status.estimated_total, None);
    assert_eq!(status.progress_fraction, None);
}

#[test]
fn test_batch_stops_when_structure_load_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let app = MockApp::default();
    app.echo_on_key(KeyCombo::Enter, Echo::DialogText, ["[12:00:01] Loading aborted."]);
    app.echo_on_click(
        at(ControlName::StartDlw),
        Echo::DialogFileMessages,
        ["[12:00:02] done."],
    );
    let nw = NanoWrite::from_session(open_session(
        &app,
        fast_config(Some(dir.path().to_path_buf())),
    ));

    let batch = StructureBatch {
        files: BTreeMap::from([
            ("a.gwl".to_string(), "PiezoGotoX 1\nwrite".to_string()),
            ("b.gwl".to_string(), "PiezoGotoX 2\nwrite".to_string()),
        ]),
        jobs: vec![
            BatchJob {
                start: "a.gwl".to_string(),
                readback: vec!["out.txt".to_string()],
            },
            BatchJob {
                start: "b.gwl".to_string(),
                readback: Vec::new(),
            },
        ],
    };
    let results = nw.load_structure_batch(&batch).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].start, "a.gwl");
    assert_eq!(results[0].state, JobState::Aborted);
    assert!(results[0].artifacts.is_empty());
    assert!(!app.calls().contains(&MockCall::Click(at(ControlName::StartDlw))));
}
