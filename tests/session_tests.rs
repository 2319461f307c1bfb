use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use stack_alignment::config::Config;
use stack_alignment::*;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tempfile::TempDir;

/// Deterministic texture; `(dx, dy)` moves the content right and down.
fn textured(width: u32, height: u32, dx: i64, dy: i64) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let (u, v) = (x as i64 - dx, y as i64 - dy);
        let value = ((u * 7 + v * 13).rem_euclid(200) + 30) as u8;
        Rgb([value, value / 2, 255 - value])
    })
}

fn write_png(dir: &TempDir, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.path().join(name);
    image.save(&path).unwrap();
    path
}

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.composite.temp_directory = Some(dir.path().to_path_buf());
    config.composite.loading_delay_ms = 0;
    config
}

fn add_landmarks(session: &mut AlignmentSession, image: usize, points: &[(f64, f64)]) {
    for &p in points {
        session
            .apply_edit(LandmarkEdit::Add { image, point: p.into() })
            .unwrap();
    }
}

const REFERENCE_POINTS: [(f64, f64); 4] = [(20.0, 20.0), (90.0, 25.0), (30.0, 80.0), (100.0, 90.0)];

fn shifted_points(dx: f64, dy: f64) -> Vec<(f64, f64)> {
    REFERENCE_POINTS.iter().map(|&(x, y)| (x + dx, y + dy)).collect()
}

fn manual(keep_original_pixels: bool) -> AlignmentRequest {
    AlignmentRequest {
        mode: AlignmentMode::Manual,
        rotate: false,
        keep_original_pixels,
    }
}

/// Two 120x100 images, the second one's content moved 10 left and 5 up.
fn loaded_pair(dir: &TempDir) -> AlignmentSession {
    let a = write_png(dir, "a.png", &textured(120, 100, 0, 0));
    let b = write_png(dir, "b.png", &textured(120, 100, -10, -5));

    let mut session = AlignmentSession::new(config_in(dir));
    let report = session.initialize(&[a, b]).unwrap();
    assert!(report.errors.is_empty());
    add_landmarks(&mut session, 0, &REFERENCE_POINTS);
    add_landmarks(&mut session, 1, &shifted_points(-10.0, -5.0));
    session
}

#[test]
fn test_manual_alignment_keeps_every_pixel() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_pair(&dir);
    assert!(session.can_align());

    let outcome = session.align(&manual(true)).unwrap();
    assert_eq!(outcome.reference, 0);
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.stack.dimensions(), (130, 105));

    let slices = outcome.stack.slices();
    assert_eq!(slices.len(), 3);
    assert_eq!(slices[0].kind, SliceKind::Reference);
    assert_eq!(slices[0].offset, (0, 0));
    assert_eq!(slices[1].offset, (10, 5));

    // Content lines up: the moved image's pixel (0, 0) shows reference (10, 5).
    let reference = textured(120, 100, 0, 0);
    let page = outcome.stack.render_page(2).unwrap();
    assert_eq!(page.get_pixel(20, 10), reference.get_pixel(20, 10));
}

#[test]
fn test_cropped_alignment_stays_in_reference_frame() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_pair(&dir);

    let outcome = session.align(&manual(false)).unwrap();
    assert_eq!(outcome.stack.dimensions(), (120, 100));
    assert_eq!(outcome.stack.len(), 2);

    let reference = textured(120, 100, 0, 0);
    let warped = outcome.stack.render_page(1).unwrap();
    assert_eq!(warped.get_pixel(50, 40), reference.get_pixel(50, 40));
    assert_eq!(warped.get_pixel(5, 2), &Rgb([0, 0, 0]));
}

#[test]
fn test_degenerate_image_left_out_of_stack() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_pair(&dir);
    let c = write_png(&dir, "c.png", &textured(120, 100, 0, 0));
    session.add_file(&c).unwrap();
    add_landmarks(&mut session, 2, &[(30.0, 30.0); 4]);

    let outcome = session.align(&manual(true)).unwrap();
    assert_eq!(outcome.registrations.len(), 2);
    assert!(matches!(outcome.failures[..], [AlignError::DegenerateLandmarks { image: 2 }]));
    assert!(outcome.stack.slices().iter().all(|s| s.image != 2));
}

#[test]
fn test_lone_degenerate_image_reported_as_such() {
    let dir = TempDir::new().unwrap();
    let a = write_png(&dir, "a.png", &textured(120, 100, 0, 0));
    let b = write_png(&dir, "b.png", &textured(120, 100, 0, 0));
    let mut session = AlignmentSession::new(config_in(&dir));
    session.initialize(&[a, b]).unwrap();
    add_landmarks(&mut session, 0, &REFERENCE_POINTS);
    add_landmarks(&mut session, 1, &[(30.0, 30.0); 4]);

    let error = session.align(&manual(true)).unwrap_err();
    assert!(matches!(error, AlignError::DegenerateLandmarks { image: 1 }), "{error:?}");
}

#[test]
fn test_every_moving_image_failing_reports_each() {
    let dir = TempDir::new().unwrap();
    let paths: Vec<PathBuf> = ["a.png", "b.png", "c.png"]
        .iter()
        .map(|name| write_png(&dir, name, &textured(120, 100, 0, 0)))
        .collect();
    let mut session = AlignmentSession::new(config_in(&dir));
    session.initialize(&paths).unwrap();
    add_landmarks(&mut session, 0, &REFERENCE_POINTS);
    add_landmarks(&mut session, 1, &[(30.0, 30.0); 4]);
    add_landmarks(&mut session, 2, &[(60.0, 50.0); 4]);

    match session.align(&manual(false)) {
        Err(AlignError::NothingRegistered { failures }) => assert!(matches!(
            failures[..],
            [AlignError::DegenerateLandmarks { image: 1 }, AlignError::DegenerateLandmarks { image: 2 }]
        )),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_featureless_pair_reports_missing_correspondence() {
    let dir = TempDir::new().unwrap();
    let flat = RgbImage::from_pixel(120, 100, Rgb([80, 80, 80]));
    let a = write_png(&dir, "a.png", &flat);
    let b = write_png(&dir, "b.png", &flat);
    let mut session = AlignmentSession::new(config_in(&dir));
    session.initialize(&[a, b]).unwrap();

    let request = AlignmentRequest {
        mode: AlignmentMode::Auto,
        rotate: false,
        keep_original_pixels: false,
    };
    let error = session.align(&request).unwrap_err();
    assert!(
        matches!(error, AlignError::InsufficientCorrespondence { reference: 0, moving: 1, .. }),
        "{error:?}"
    );
}

#[test]
fn test_identical_landmarks_stack_at_origin() {
    let dir = TempDir::new().unwrap();
    let paths: Vec<PathBuf> = (0..3)
        .map(|i| write_png(&dir, &format!("{i}.png"), &textured(100, 100, i, 0)))
        .collect();
    let mut session = AlignmentSession::new(config_in(&dir));
    session.initialize(&paths).unwrap();
    for image in 0..3 {
        add_landmarks(&mut session, image, &[(10.0, 10.0), (80.0, 20.0), (30.0, 70.0)]);
    }

    let outcome = session.align(&manual(true)).unwrap();
    assert_eq!(outcome.reference, 0);
    assert_eq!(outcome.registrations.len(), 3);
    assert!(outcome.registrations.iter().all(|r| r.transform.is_identity(1e-6)));
    assert_eq!(outcome.stack.dimensions(), (100, 100));
    assert_eq!(outcome.stack.len(), 5);
    assert!(outcome.stack.slices().iter().all(|s| s.offset == (0, 0)));
}

#[test]
fn test_shifted_landmarks_widen_canvas() {
    let dir = TempDir::new().unwrap();
    let wide = write_png(&dir, "wide.png", &textured(200, 100, 0, 0));
    let small = write_png(&dir, "small.png", &textured(100, 100, -50, 0));
    let mut session = AlignmentSession::new(config_in(&dir));
    session.initialize(&[wide, small]).unwrap();

    let reference = [(60.0, 20.0), (140.0, 30.0), (90.0, 80.0)];
    add_landmarks(&mut session, 0, &reference);
    let moved: Vec<(f64, f64)> = reference.iter().map(|&(x, y)| (x - 50.0, y)).collect();
    add_landmarks(&mut session, 1, &moved);

    let outcome = session.align(&manual(true)).unwrap();
    assert_eq!(outcome.reference, 0);
    let (dx, dy) = outcome.registrations[1].transform.translation_part();
    assert!((dx - 50.0).abs() < 1e-6 && dy.abs() < 1e-6, "({dx}, {dy})");

    assert_eq!(outcome.stack.dimensions(), (250, 100));
    let slices = outcome.stack.slices();
    assert_eq!(slices[0].offset, (0, 0));
    assert_eq!(slices[1].kind, SliceKind::Transformed);
    assert_eq!(slices[1].image, 1);
    assert_eq!(slices[1].offset, (50, 0));
}

#[test]
fn test_unequal_landmark_sets_abort_before_compositing() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_pair(&dir);
    session
        .apply_edit(LandmarkEdit::Remove { image: 1, ordinal: 4 })
        .unwrap();

    assert!(!session.can_align());
    let error = session.align(&manual(true)).unwrap_err();
    assert!(error.aborts_run());
    assert!(matches!(error, AlignError::LandmarkCardinalityMismatch { counts } if counts == vec![4, 3]));
}

#[test]
fn test_composite_reused_as_new_source() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_pair(&dir);
    let outcome = session.align(&manual(true)).unwrap();

    let (path, report) = session.reuse_composite(&outcome.stack).unwrap();
    assert!(path.exists());
    assert!(report.errors.is_empty());
    assert_eq!(session.image_count(), 3);
    assert_eq!(session.sources().sources()[0].working_dimensions(), (130, 105));
    assert_eq!(session.landmarks().counts(), vec![0, 0, 0]);

    session.dispose();
    assert!(!path.exists());
    assert_eq!(session.image_count(), 0);
}

#[test]
fn test_replaced_image_written_to_dated_directory() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_pair(&dir);
    let edited = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 100, Rgb([9, 8, 7])));

    let (old, new) = session.replace_image(1, &edited).unwrap();
    assert_eq!(old, dir.path().join("b.png"));
    assert!(new.exists());
    assert_eq!(new.parent().unwrap().parent().unwrap(), dir.path());
    assert_eq!(new.extension().unwrap(), "tiff");

    assert_eq!(session.image_count(), 2);
    assert_eq!(session.landmarks().counts(), vec![4, 4]);
    session.set_current(1).unwrap();
    let current = session.current_image().unwrap().to_rgb8();
    assert_eq!(current.get_pixel(3, 3), &Rgb([9, 8, 7]));
}

#[test]
fn test_missing_file_reported_others_loaded() {
    let dir = TempDir::new().unwrap();
    let a = write_png(&dir, "a.png", &textured(40, 30, 0, 0));
    let missing = dir.path().join("missing.png");

    let mut session = AlignmentSession::new(config_in(&dir));
    let report = session.initialize(&[a, missing]).unwrap();
    assert_eq!(report.added, vec![0]);
    assert!(matches!(report.errors[..], [AlignError::Io { .. }]));
    assert!(report.warnings.contains(&Warning::SingleImage));
}

#[test]
fn test_worker_runs_alignment_in_background() {
    let dir = TempDir::new().unwrap();
    let a = write_png(&dir, "a.png", &textured(120, 100, 0, 0));
    let b = write_png(&dir, "b.png", &textured(120, 100, -10, -5));

    let session = Arc::new(Mutex::new(AlignmentSession::new(config_in(&dir))));
    let (tx, rx) = mpsc::channel();
    let worker = Worker::spawn(session.clone(), tx, Duration::ZERO);

    worker.submit(Job::Load(vec![a, b])).unwrap();
    let loaded: Vec<Event> = rx.iter().take_while(|e| !matches!(e, Event::LoadingFinished)).collect();
    assert!(matches!(loaded[0], Event::LoadingStarted));
    assert_eq!(session.lock().image_count(), 2);

    {
        let mut session = session.lock();
        add_landmarks(&mut session, 0, &REFERENCE_POINTS);
        add_landmarks(&mut session, 1, &shifted_points(-10.0, -5.0));
    }
    worker.submit(Job::Align(manual(false))).unwrap();
    let events: Vec<Event> = rx.iter().take_while(|e| !matches!(e, Event::LoadingFinished)).collect();
    let outcome = events.iter().find_map(|e| match e {
        Event::AlignmentFinished(outcome) => Some(outcome),
        _ => None,
    });
    assert_eq!(outcome.unwrap().stack.len(), 2);
}
