use chrono::{TimeZone, Utc};
use kms_capture_core::store::list_backup_paths;
use kms_capture_core::{
    parse_capture, CaptureEngine, CaptureRecord, EngineConfig, MediaAttachment, MediaKind, Modality,
};

fn engine_at(root: &std::path::Path) -> CaptureEngine {
    CaptureEngine::new(&EngineConfig::for_vault(root)).unwrap()
}

fn hello_record() -> CaptureRecord {
    let ts = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
    let mut record = CaptureRecord::new(ts, "Hello world");
    record.tags = ["a", "b"].into_iter().collect();
    record
}

#[test]
fn text_capture_writes_header_and_content_without_backups() {
    let vault = tempfile::tempdir().unwrap();
    let engine = engine_at(vault.path());
    let record = hello_record();
    assert_eq!(
        record.modalities.iter().copied().collect::<Vec<_>>(),
        vec![Modality::Text]
    );

    let saved = engine.save(&record, &[]).unwrap();
    assert_eq!(saved.id, record.id);
    assert_eq!(
        saved.path.file_name().unwrap().to_str().unwrap(),
        format!("{}.md", record.id)
    );

    let text = std::fs::read_to_string(&saved.path).unwrap();
    assert!(text.starts_with("---\ntimestamp: 2025-03-04T05:06:07+00:00\n"));
    assert!(text.contains("\ntags: [a, b]\n"));
    assert!(text.contains("\nmodalities: [text]\n"));
    assert!(text.contains("\nimportance: null\n---\n## Content\nHello world\n"));

    let file_name = saved.path.file_name().unwrap().to_str().unwrap();
    let backups = list_backup_paths(engine.layout().capture_dir(), file_name).unwrap();
    assert!(backups.is_empty());
    assert!(saved.backup.is_none());
}

#[test]
fn saving_the_same_capture_twice_never_overwrites() {
    let vault = tempfile::tempdir().unwrap();
    let engine = engine_at(vault.path());
    let record = hello_record();

    let first = engine.save(&record, &[]).unwrap();
    let original = std::fs::read_to_string(&first.path).unwrap();
    let second = engine.save(&record, &[]).unwrap();

    assert_ne!(first.path, second.path);
    assert_ne!(first.id, second.id);
    assert!(second.id.as_str().starts_with(record.id.as_str()));
    assert_eq!(std::fs::read_to_string(&first.path).unwrap(), original);

    let second_text = std::fs::read_to_string(&second.path).unwrap();
    assert!(second_text.contains(&format!("id: \"{}\"\n", second.id)));
    assert_eq!(parse_capture(&second_text).unwrap().header.id, second.id);
    assert_eq!(engine.list_captures().unwrap().len(), 2);
}

#[test]
fn screenshot_and_audio_get_sections_and_media_files() {
    let vault = tempfile::tempdir().unwrap();
    let engine = engine_at(vault.path());
    let mut record = hello_record();
    record.modalities.insert(Modality::Screenshot);
    record.modalities.insert(Modality::Audio);
    let attachments = [
        MediaAttachment::new("screen.png", MediaKind::Screenshot, vec![0x89, b'P', b'N', b'G']),
        MediaAttachment::new("voice", MediaKind::Audio, vec![b'R', b'I', b'F', b'F']),
    ];
    assert!(record.missing_modality_content(&attachments).is_empty());

    let saved = engine.save(&record, &attachments).unwrap();
    assert_eq!(saved.media.len(), 2);

    let text = std::fs::read_to_string(&saved.path).unwrap();
    let screenshot = &saved.media[0];
    let audio = &saved.media[1];
    assert!(audio.relative_path.ends_with(".wav"));
    assert!(text.contains(&format!(
        "## Screenshot\n- ![screen.png](media/{})\n",
        screenshot.relative_path
    )));
    assert!(text.contains(&format!("## Audio\n- [voice](media/{})\n", audio.relative_path)));

    let stored = std::fs::read_dir(engine.layout().media_dir())
        .unwrap()
        .count();
    assert_eq!(stored, 2);
    for media in &saved.media {
        assert!(engine.layout().media_dir().join(&media.relative_path).is_file());
    }
}

#[test]
fn unwritable_vault_is_invalid_path() {
    let vault = tempfile::tempdir().unwrap();
    let blocker = vault.path().join("blocked");
    std::fs::write(&blocker, b"file, not a directory").unwrap();
    let engine = engine_at(&blocker);

    let err = engine.save(&hello_record(), &[]).unwrap_err();
    assert_eq!(err.code(), "invalid_path");
}
