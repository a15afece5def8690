mod common;

use common::{init_tracing, FileSet};
use tidelog::{Config, Db, MemFile, Result, ScanQuery, TidelogError, VarData};

fn var_config() -> Config {
    let mut cfg = Config::new(4, 4, 512);
    cfg.num_data_pages = 1000;
    cfg.num_var_pages = 1000;
    cfg.erase_size_pages = 4;
    cfg.use_vdata = true;
    cfg.reset_data = true;
    cfg
}

fn open_var(files: &FileSet) -> Result<Db<u32, MemFile>> {
    Db::open(var_config(), files.files(), None)
}

fn payload(key: u32) -> Vec<u8> {
    format!("Testing {:03}...\0", key % 1000).into_bytes()
}

fn insert_with_payloads(
    db: &mut Db<u32, MemFile>,
    start: u32,
    count: u32,
) -> Result<()> {
    for key in start..start + count {
        db.put_var(key, &(key % 100).to_le_bytes(), Some(&payload(key)))?;
    }
    Ok(())
}

#[test]
fn page_write_timing_with_var_records() -> Result<()> {
    init_tracing();
    let files = FileSet::new(false, true);
    let mut db = open_var(&files)?;

    // 12-byte records (key + data + var pointer): 42 per page.
    insert_with_payloads(&mut db, 0, 42)?;
    assert_eq!(db.next_data_page_id(), 0);

    insert_with_payloads(&mut db, 42, 1)?;
    assert_eq!(db.next_data_page_id(), 1);
    Ok(())
}

#[test]
fn get_var_returns_fixed_and_variable_data() -> Result<()> {
    init_tracing();
    let files = FileSet::new(false, true);
    let mut db = open_var(&files)?;
    insert_with_payloads(&mut db, 0, 1000)?;

    let mut data = [0u8; 4];
    let var = db.get_var(23, &mut data)?.expect("key 23 exists");
    assert_eq!(u32::from_le_bytes(data), 23);
    let VarData::Stream(mut stream) = var else {
        panic!("expected a live payload");
    };
    assert_eq!(stream.total_bytes(), 15);
    let bytes = db.var_read_all(&mut stream)?;
    assert_eq!(&bytes[..], payload(23).as_slice());

    // Spot-check records across the whole insert range.
    for key in (0..1000).step_by(83) {
        let var = db.get_var(key, &mut data)?.expect("key exists");
        let VarData::Stream(mut stream) = var else {
            panic!("expected a live payload for key {}", key);
        };
        let bytes = db.var_read_all(&mut stream)?;
        assert_eq!(&bytes[..], payload(key).as_slice(), "key {}", key);
    }

    assert!(db.get_var(1000, &mut data)?.is_none());
    Ok(())
}

#[test]
fn records_without_payload() -> Result<()> {
    let files = FileSet::new(false, true);
    let mut db = open_var(&files)?;

    db.put_var(1, &10u32.to_le_bytes(), Some(b"hello"))?;
    db.put_var(2, &20u32.to_le_bytes(), None)?;
    db.put_var(3, &30u32.to_le_bytes(), Some(b"world"))?;

    let mut data = [0u8; 4];
    assert!(matches!(
        db.get_var(2, &mut data)?.expect("key 2 exists"),
        VarData::None
    ));
    assert_eq!(u32::from_le_bytes(data), 20);

    let VarData::Stream(mut stream) =
        db.get_var(3, &mut data)?.expect("key 3 exists")
    else {
        panic!("expected payload");
    };
    assert_eq!(&db.var_read_all(&mut stream)?[..], b"world");
    Ok(())
}

#[test]
fn payload_spanning_pages_reads_back_in_chunks() -> Result<()> {
    let files = FileSet::new(false, true);
    let mut db = open_var(&files)?;

    let big: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    db.put_var(7, &1u32.to_le_bytes(), Some(&big))?;

    let mut data = [0u8; 4];
    let VarData::Stream(mut stream) =
        db.get_var(7, &mut data)?.expect("key exists")
    else {
        panic!("expected payload");
    };
    assert_eq!(stream.total_bytes(), 2000);

    let mut collected = Vec::new();
    let mut chunk = [0u8; 97];
    loop {
        let n = db.var_read(&mut stream, &mut chunk)?;
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(collected, big);
    Ok(())
}

#[test]
fn overwritten_payloads_report_expired() -> Result<()> {
    init_tracing();
    let mut cfg = var_config();
    // A var log this small wraps after a few dozen payloads.
    cfg.num_var_pages = 8;
    cfg.erase_size_pages = 2;
    cfg.num_data_pages = 1000;
    let files = FileSet::new(false, true);
    let mut db: Db<u32, MemFile> = Db::open(cfg, files.files(), None)?;

    let blob = [0xabu8; 200];
    for key in 0..50u32 {
        db.put_var(key, &key.to_le_bytes(), Some(&blob))?;
    }
    assert!(db.min_var_record_id() > 0);

    // The fixed part of an expired record is still served.
    let mut data = [0u8; 4];
    match db.get_var(0, &mut data)?.expect("key 0 still has fixed data") {
        VarData::Expired => {}
        other => panic!("expected expired payload, got {:?}", other),
    }
    assert_eq!(u32::from_le_bytes(data), 0);

    // Recent payloads are intact.
    let VarData::Stream(mut stream) =
        db.get_var(49, &mut data)?.expect("key 49 exists")
    else {
        panic!("expected payload");
    };
    assert_eq!(&db.var_read_all(&mut stream)?[..], &blob[..]);
    Ok(())
}

#[test]
fn scan_resolves_payloads() -> Result<()> {
    let files = FileSet::new(false, true);
    let mut db = open_var(&files)?;
    insert_with_payloads(&mut db, 0, 100)?;

    let query = ScanQuery {
        min_key: Some(40),
        max_key: Some(60),
        min_data: None,
        max_data: None,
    };
    let mut scan = db.scan(query)?;
    let mut seen = Vec::new();
    let mut streams = Vec::new();
    while let Some((key, data, var)) = scan.next_var()? {
        assert_eq!(u32::from_le_bytes(data.try_into().unwrap()), key % 100);
        let VarData::Stream(stream) = var else {
            panic!("expected payload for key {}", key);
        };
        seen.push(key);
        streams.push((key, stream));
    }
    assert_eq!(seen, (40..=60).collect::<Vec<u32>>());

    for (key, mut stream) in streams {
        let bytes = db.var_read_all(&mut stream)?;
        assert_eq!(&bytes[..], payload(key).as_slice(), "key {}", key);
    }
    Ok(())
}

#[test]
fn put_var_requires_the_feature() -> Result<()> {
    let mut cfg = Config::new(4, 4, 512);
    cfg.num_data_pages = 64;
    cfg.erase_size_pages = 8;
    cfg.reset_data = true;
    let files = FileSet::new(false, false);
    let mut db: Db<u32, MemFile> = Db::open(cfg, files.files(), None)?;
    assert!(matches!(
        db.put_var(1, &[0; 4], Some(b"x")),
        Err(TidelogError::Config(_))
    ));
    Ok(())
}
