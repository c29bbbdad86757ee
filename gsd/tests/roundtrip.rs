use gsd::{GsdError, GsdFile, GsdType, OpenMode};

fn tmp_path(name: &str) -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("gsd-test-{}-{}", std::process::id(), name));
    p
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[test]
fn freshly_created_file_has_no_frames() {
    let path = tmp_path("empty");
    let _ = std::fs::remove_file(&path);

    GsdFile::create(&path, "test-app", "test-schema", gsd::make_version(1, 0)).unwrap();
    let file = GsdFile::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(file.n_frames(), 0);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn write_end_frame_reopen_and_read_back() {
    let path = tmp_path("roundtrip");
    let _ = std::fs::remove_file(&path);

    GsdFile::create_and_open(&path, "test-app", "test-schema", gsd::make_version(1, 0), OpenMode::ReadWrite, false)
        .unwrap()
        .close()
        .unwrap();

    let mut file = GsdFile::open(&path, OpenMode::ReadWrite).unwrap();
    let position = f32_bytes(&[1.0, 2.0, 3.0]);
    file.write_chunk(b"particles/position", GsdType::Float32.into(), 1, 3, 0, &position)
        .unwrap();
    file.end_frame().unwrap();
    drop(file);

    let file = GsdFile::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(file.n_frames(), 1);

    let entry = file
        .find_chunk(0, b"particles/position")
        .unwrap()
        .expect("chunk should be found");

    let mut buf = vec![0u8; position.len()];
    file.read_chunk(&mut buf, &entry).unwrap();
    assert_eq!(buf, position);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn writing_past_initial_index_capacity_triggers_exactly_one_growth() {
    let path = tmp_path("growth");
    let _ = std::fs::remove_file(&path);

    let mut file =
        GsdFile::create_and_open(&path, "test-app", "test-schema", gsd::make_version(1, 0), OpenMode::ReadWrite, false)
            .unwrap();

    // 128 is the initial index allocation; 200 entries across 3 frames should force exactly one
    // 8x growth, to 1024 entries, and no more.
    let value = f32_bytes(&[42.0]);
    let mut written = 0;
    for frame in 0..3u32 {
        let per_frame = if frame < 2 { 80 } else { 40 };
        for i in 0..per_frame {
            let name = format!("log/value_{}_{}", frame, i);
            file.write_chunk(name.as_bytes(), GsdType::Float32.into(), 1, 1, 0, &value).unwrap();
            written += 1;
        }
        file.end_frame().unwrap();
    }
    assert_eq!(written, 200);
    assert_eq!(file.n_frames(), 3);
    drop(file);

    let file = GsdFile::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(file.n_frames(), 3);
    let entry = file.find_chunk(2, b"log/value_2_39").unwrap();
    assert!(entry.is_some());

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn find_chunk_respects_frame_boundaries() {
    let path = tmp_path("boundaries");
    let _ = std::fs::remove_file(&path);

    let mut file =
        GsdFile::create_and_open(&path, "test-app", "test-schema", gsd::make_version(1, 0), OpenMode::ReadWrite, false)
            .unwrap();

    let a = f32_bytes(&[1.0]);
    file.write_chunk(b"energy", GsdType::Float32.into(), 1, 1, 0, &a).unwrap();
    file.end_frame().unwrap();

    // Frame 1 has no "energy" chunk at all.
    file.write_chunk(b"temperature", GsdType::Float32.into(), 1, 1, 0, &a).unwrap();
    file.end_frame().unwrap();

    let b = f32_bytes(&[2.0]);
    file.write_chunk(b"energy", GsdType::Float32.into(), 1, 1, 0, &b).unwrap();
    file.end_frame().unwrap();

    assert!(file.find_chunk(0, b"energy").unwrap().is_some());
    assert!(file.find_chunk(1, b"energy").unwrap().is_none());
    assert!(file.find_chunk(2, b"energy").unwrap().is_some());
    assert!(file.find_chunk(3, b"energy").unwrap().is_none(), "frame 3 was never written");

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn overwriting_a_chunk_in_the_same_frame_keeps_the_last_write() {
    let path = tmp_path("overwrite");
    let _ = std::fs::remove_file(&path);

    let mut file =
        GsdFile::create_and_open(&path, "test-app", "test-schema", gsd::make_version(1, 0), OpenMode::ReadWrite, false)
            .unwrap();

    let first = f32_bytes(&[1.0]);
    let second = f32_bytes(&[2.0]);
    file.write_chunk(b"step", GsdType::Float32.into(), 1, 1, 0, &first).unwrap();
    file.write_chunk(b"step", GsdType::Float32.into(), 1, 1, 0, &second).unwrap();
    file.end_frame().unwrap();

    let entry = file.find_chunk(0, b"step").unwrap().expect("chunk should be found");
    let mut buf = vec![0u8; second.len()];
    file.read_chunk(&mut buf, &entry).unwrap();
    assert_eq!(buf, second, "the later write within a frame must win");

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn repeatedly_writing_a_brand_new_name_in_one_frame_keeps_the_last_write() {
    let path = tmp_path("repeated-new-name");
    let _ = std::fs::remove_file(&path);

    let mut file =
        GsdFile::create_and_open(&path, "test-app", "test-schema", gsd::make_version(1, 0), OpenMode::ReadWrite, false)
            .unwrap();

    // "pressure" has never been committed before, so each of these three writes exercises the
    // name-resolution path that must reuse one id instead of minting a new namelist slot per call.
    let values = [f32_bytes(&[1.0]), f32_bytes(&[2.0]), f32_bytes(&[3.0])];
    for value in &values {
        file.write_chunk(b"pressure", GsdType::Float32.into(), 1, 1, 0, value).unwrap();
    }
    file.end_frame().unwrap();

    let entry = file.find_chunk(0, b"pressure").unwrap().expect("chunk should be found");
    let mut buf = vec![0u8; 4];
    file.read_chunk(&mut buf, &entry).unwrap();
    assert_eq!(buf, values[2], "the third, most recent write must win");

    drop(file);
    let file = GsdFile::open(&path, OpenMode::ReadOnly).unwrap();
    let entry = file.find_chunk(0, b"pressure").unwrap().expect("chunk should be found after reopen");
    let mut buf = vec![0u8; 4];
    file.read_chunk(&mut buf, &entry).unwrap();
    assert_eq!(buf, values[2]);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn a_truncated_index_block_is_reported_as_corrupt() {
    let path = tmp_path("corrupt");
    let _ = std::fs::remove_file(&path);

    GsdFile::create(&path, "test-app", "test-schema", gsd::make_version(1, 0)).unwrap();

    // Chop the file off in the middle of the index block so the header's claimed
    // index_location/index_allocated_entries no longer fit inside the file.
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(300).unwrap();
    drop(file);

    match GsdFile::open(&path, OpenMode::ReadOnly) {
        Err(GsdError::FileCorrupt(_)) => {}
        Err(other) => panic!("expected FileCorrupt, got {:?}", other),
        Ok(_) => panic!("expected FileCorrupt, got Ok"),
    }

    std::fs::remove_file(&path).unwrap();
}
