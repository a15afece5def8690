mod common;

use common::{compare_u32, init_tracing, FileSet, RangeBitmap16};
use tidelog::{
    BitmapCodec, Config, Db, MemFile, Result, ScanQuery, VarData,
};

/// 92 pages of 4-byte keys and 8-byte values, 42 records per page.
fn base_config(reset: bool) -> Config {
    let mut cfg = Config::new(4, 8, 512);
    cfg.num_data_pages = 92;
    cfg.erase_size_pages = 4;
    cfg.num_spline_points = 4;
    cfg.reset_data = reset;
    cfg
}

fn open(cfg: Config, files: &FileSet) -> Result<Db<u32, MemFile>> {
    Db::open(cfg, files.files(), None)
}

fn insert_linear(
    db: &mut Db<u32, MemFile>,
    start_key: u32,
    start_data: u64,
    count: u32,
) -> Result<()> {
    for i in 0..count {
        db.put(start_key + i, &(start_data + u64::from(i)).to_le_bytes())?;
    }
    Ok(())
}

#[test]
fn recovers_empty_database() -> Result<()> {
    init_tracing();
    let files = FileSet::new(false, false);
    open(base_config(true), &files)?.close()?;

    let db = open(base_config(false), &files)?;
    assert_eq!(db.next_data_page_id(), 0);
    assert_eq!(db.min_data_page_id(), 0);
    assert_eq!(db.num_avail_data_pages(), 92);
    assert_eq!(db.min_key(), None);
    Ok(())
}

#[test]
fn recovers_partially_filled_log() -> Result<()> {
    init_tracing();
    let files = FileSet::new(false, false);
    let mut db = open(base_config(true), &files)?;
    // 27 full pages; the one buffered record is lost without a flush.
    insert_linear(&mut db, 10, 20230615, 1135)?;
    db.close()?;

    let db = open(base_config(false), &files)?;
    assert_eq!(db.min_key(), Some(10));
    assert_eq!(db.next_data_page_id(), 27);
    assert_eq!(db.min_data_page_id(), 0);
    assert_eq!(db.num_avail_data_pages(), 65);
    Ok(())
}

#[test]
fn recovers_exactly_full_log() -> Result<()> {
    let files = FileSet::new(false, false);
    let mut db = open(base_config(true), &files)?;
    insert_linear(&mut db, 3457, 2548, 3865)?;
    db.close()?;

    let db = open(base_config(false), &files)?;
    assert_eq!(db.min_key(), Some(3457));
    assert_eq!(db.next_data_page_id(), 92);
    assert_eq!(db.min_data_page_id(), 0);
    assert_eq!(db.num_avail_data_pages(), 0);
    Ok(())
}

#[test]
fn recovers_wrapped_log() -> Result<()> {
    init_tracing();
    let files = FileSet::new(false, false);
    let mut db = open(base_config(true), &files)?;
    insert_linear(&mut db, 1645, 2548, 3907)?;
    db.close()?;

    let mut db = open(base_config(false), &files)?;
    // Block zero was reclaimed, so the oldest live page is page 4.
    assert_eq!(db.min_key(), Some(1645 + 4 * 42));
    assert_eq!(db.next_data_page_id(), 93);
    assert_eq!(db.min_data_page_id(), 4);
    assert_eq!(db.num_avail_data_pages(), 3);

    let mut data = [0u8; 8];
    assert!(!db.get(1645, &mut data)?);
    let first_live = 1645 + 4 * 42;
    for key in (first_live..first_live + 3000).step_by(71) {
        assert!(db.get(key, &mut data)?, "key {} missing", key);
        assert_eq!(u64::from_le_bytes(data), 2548 + u64::from(key - 1645));
    }
    Ok(())
}

#[test]
fn recovery_is_idempotent() -> Result<()> {
    let files = FileSet::new(false, false);
    let mut db = open(base_config(true), &files)?;
    insert_linear(&mut db, 1645, 2548, 3907)?;
    db.close()?;

    let first = open(base_config(false), &files)?;
    let state_one = (
        first.next_data_page_id(),
        first.min_data_page_id(),
        first.num_avail_data_pages(),
        first.min_key(),
    );
    first.close()?;

    let second = open(base_config(false), &files)?;
    let state_two = (
        second.next_data_page_id(),
        second.min_data_page_id(),
        second.num_avail_data_pages(),
        second.min_key(),
    );
    assert_eq!(state_one, state_two);
    Ok(())
}

#[test]
fn inserts_continue_after_recovery() -> Result<()> {
    let files = FileSet::new(false, false);
    let mut db = open(base_config(true), &files)?;
    // 87 full pages persisted; one buffered record is dropped on close.
    insert_linear(&mut db, 1001, 5601, 3655)?;
    db.close()?;

    let mut db = open(base_config(false), &files)?;
    assert_eq!(db.next_data_page_id(), 87);
    // Last persisted key is 1001 + 87 * 42 - 1 = 4654.
    insert_linear(&mut db, 4655, 10, 43)?;

    let mut data = [0u8; 8];
    for key in (1001..=4654).step_by(53) {
        assert!(db.get(key, &mut data)?, "old key {} missing", key);
        assert_eq!(u64::from_le_bytes(data), 5601 + u64::from(key - 1001));
    }
    for key in 4655..4698u32 {
        assert!(db.get(key, &mut data)?, "new key {} missing", key);
        assert_eq!(u64::from_le_bytes(data), 10 + u64::from(key - 4655));
    }
    Ok(())
}

fn indexed_config(reset: bool) -> Config {
    let mut cfg = Config::new(4, 4, 64);
    cfg.num_data_pages = 1000;
    cfg.num_index_pages = 48;
    cfg.erase_size_pages = 8;
    cfg.use_index = true;
    cfg.use_bmap = true;
    cfg.bitmap_size = 2;
    cfg.compare_data = Some(compare_u32);
    cfg.reset_data = reset;
    cfg
}

fn codec() -> Box<dyn BitmapCodec> {
    Box::new(RangeBitmap16 { min: 0, max: 99 })
}

#[test]
fn recovers_index_log() -> Result<()> {
    init_tracing();
    let files = FileSet::new(true, false);
    let mut db: Db<u32, MemFile> =
        Db::open(indexed_config(true), files.files(), Some(codec()))?;
    // 7 records per data page, 24 bitmaps per index page.
    for i in 0..400u32 {
        db.put(i, &(i % 100).to_le_bytes())?;
    }
    db.flush()?;
    db.close()?;

    let mut db: Db<u32, MemFile> =
        Db::open(indexed_config(false), files.files(), Some(codec()))?;

    // Filtered scans still prune through the recovered index log.
    let query = ScanQuery {
        min_key: None,
        max_key: None,
        min_data: Some(90u32.to_le_bytes().to_vec()),
        max_data: Some(95u32.to_le_bytes().to_vec()),
    };
    let mut scan = db.scan(query)?;
    let mut emitted = Vec::new();
    while let Some((key, _)) = scan.next_record()? {
        emitted.push(key);
    }
    let expected: Vec<u32> =
        (0..400).filter(|i| (90..=95).contains(&(i % 100))).collect();
    assert_eq!(emitted, expected);
    assert!(db.stats().index_reads > 0);

    // Appending keeps working against the recovered index cursor.
    for i in 400..500u32 {
        db.put(i, &(i % 100).to_le_bytes())?;
    }
    let mut data = [0u8; 4];
    assert!(db.get(450, &mut data)?);
    Ok(())
}

fn var_config(reset: bool) -> Config {
    let mut cfg = Config::new(4, 4, 512);
    cfg.num_data_pages = 1000;
    cfg.num_var_pages = 8;
    cfg.erase_size_pages = 4;
    cfg.use_vdata = true;
    cfg.reset_data = reset;
    cfg
}

#[test]
fn recovers_var_log() -> Result<()> {
    init_tracing();
    let files = FileSet::new(false, true);
    let mut db: Db<u32, MemFile> =
        Db::open(var_config(true), files.files(), None)?;
    let blob = |key: u32| vec![key as u8; 64];
    for key in 0..100u32 {
        db.put_var(key, &key.to_le_bytes(), Some(&blob(key)))?;
    }
    db.flush()?;
    assert!(db.min_var_record_id() > 0, "var log should have wrapped");
    db.close()?;

    let mut db: Db<u32, MemFile> =
        Db::open(var_config(false), files.files(), None)?;
    assert!(db.min_var_record_id() > 0);

    let mut data = [0u8; 4];
    match db.get_var(0, &mut data)?.expect("fixed data survives") {
        VarData::Expired => {}
        other => panic!("expected expired, got {:?}", other),
    }

    let VarData::Stream(mut stream) =
        db.get_var(99, &mut data)?.expect("key 99 exists")
    else {
        panic!("newest payload must be live");
    };
    assert_eq!(&db.var_read_all(&mut stream)?[..], &blob(99)[..]);

    // New payloads continue from the recovered write position.
    db.put_var(100, &100u32.to_le_bytes(), Some(&blob(100)))?;
    let VarData::Stream(mut stream) =
        db.get_var(100, &mut data)?.expect("key 100 exists")
    else {
        panic!("expected payload");
    };
    assert_eq!(&db.var_read_all(&mut stream)?[..], &blob(100)[..]);
    Ok(())
}

fn rlc_config(reset: bool) -> Config {
    let mut cfg = Config::new(4, 8, 512);
    cfg.num_data_pages = 32;
    cfg.erase_size_pages = 4;
    cfg.num_spline_points = 8;
    cfg.record_level_consistency = true;
    cfg.reset_data = reset;
    cfg
}

#[test]
fn rlc_reserves_two_blocks() -> Result<()> {
    let files = FileSet::new(false, false);
    let db = open(rlc_config(true), &files)?;
    assert_eq!(db.num_avail_data_pages(), 24);
    Ok(())
}

#[test]
fn rlc_restores_partial_page_after_restart() -> Result<()> {
    init_tracing();
    let files = FileSet::new(false, false);
    let mut db = open(rlc_config(true), &files)?;
    // One full page (42 records) plus one buffered record. No flush.
    insert_linear(&mut db, 400, 204021, 43)?;
    assert_eq!(db.next_data_page_id(), 1);
    db.close()?;

    let mut db = open(rlc_config(false), &files)?;
    assert_eq!(db.next_data_page_id(), 1);
    let mut data = [0u8; 8];
    for key in 400..443u32 {
        assert!(db.get(key, &mut data)?, "key {} missing", key);
        assert_eq!(
            u64::from_le_bytes(data),
            204021 + u64::from(key - 400)
        );
    }
    assert!(!db.get(443, &mut data)?);

    // Inserting picks up where the buffer left off.
    insert_linear(&mut db, 443, 1, 42)?;
    for key in 400..485u32 {
        assert!(db.get(key, &mut data)?, "key {} missing", key);
    }
    Ok(())
}

#[test]
fn rlc_recovers_buffer_only_records() -> Result<()> {
    let files = FileSet::new(false, false);
    let mut db = open(rlc_config(true), &files)?;
    insert_linear(&mut db, 202020, 101010, 12)?;
    assert_eq!(db.next_data_page_id(), 0);
    db.close()?;

    let mut db = open(rlc_config(false), &files)?;
    assert_eq!(db.next_data_page_id(), 0);
    assert_eq!(db.num_avail_data_pages(), 24);
    let mut data = [0u8; 8];
    for key in 202020..202032u32 {
        assert!(db.get(key, &mut data)?, "key {} missing", key);
        assert_eq!(
            u64::from_le_bytes(data),
            101010 + u64::from(key - 202020)
        );
    }
    assert!(!db.get(202032, &mut data)?);
    Ok(())
}

#[test]
fn rlc_discards_stale_temporary_pages_after_flush() -> Result<()> {
    let files = FileSet::new(false, false);
    let mut db = open(rlc_config(true), &files)?;
    insert_linear(&mut db, 12345, 11, 42)?;
    db.flush()?;
    db.close()?;

    let mut db = open(rlc_config(false), &files)?;
    assert_eq!(db.next_data_page_id(), 1);
    // The flushed page is all there is; the pre-flush temporary copies
    // must not resurrect.
    let mut data = [0u8; 8];
    for key in 12345..12387u32 {
        assert!(db.get(key, &mut data)?, "key {} missing", key);
    }
    assert!(!db.get(12387, &mut data)?);
    Ok(())
}

#[test]
fn rlc_with_var_data_restores_partial_page() -> Result<()> {
    init_tracing();
    let mut cfg = Config::new(4, 8, 512);
    cfg.num_data_pages = 32;
    cfg.erase_size_pages = 4;
    cfg.num_var_pages = 16;
    cfg.num_spline_points = 8;
    cfg.use_vdata = true;
    cfg.record_level_consistency = true;
    cfg.reset_data = true;
    let files = FileSet::new(false, true);
    let mut db: Db<u32, MemFile> = Db::open(cfg.clone(), files.files(), None)?;

    // 16-byte records, 31 per page: one full page plus four buffered.
    let blob = |key: u32| vec![key as u8; 120];
    for key in 1..=35u32 {
        db.put_var(key, &u64::from(key).to_le_bytes(), Some(&blob(key)))?;
    }
    assert_eq!(db.next_data_page_id(), 1);
    db.close()?;

    cfg.reset_data = false;
    let mut db: Db<u32, MemFile> = Db::open(cfg, files.files(), None)?;
    assert_eq!(db.next_data_page_id(), 1);

    // Every fixed record survives, including the buffered tail.
    let mut data = [0u8; 8];
    for key in 1..=35u32 {
        assert!(db.get(key, &mut data)?, "key {} missing", key);
        assert_eq!(u64::from_le_bytes(data), u64::from(key));
    }
    assert!(!db.get(36, &mut data)?);

    // Payloads that reached storage before the restart read back whole.
    for key in [2u32, 10, 20] {
        let VarData::Stream(mut stream) =
            db.get_var(key, &mut data)?.expect("key exists")
        else {
            panic!("expected payload for key {}", key);
        };
        assert_eq!(&db.var_read_all(&mut stream)?[..], &blob(key)[..]);
    }
    Ok(())
}

#[test]
fn rlc_survives_wrap_and_restart() -> Result<()> {
    init_tracing();
    let files = FileSet::new(false, false);
    let mut db = open(rlc_config(true), &files)?;
    // 24 usable pages hold 1008 records; 1023 wraps the log once and
    // leaves 15 records in the consistency window.
    insert_linear(&mut db, 1, 1, 1023)?;
    assert_eq!(db.next_data_page_id(), 24);
    assert_eq!(db.min_data_page_id(), 4);
    assert_eq!(db.num_avail_data_pages(), 4);
    db.close()?;

    let mut db = open(rlc_config(false), &files)?;
    assert_eq!(db.next_data_page_id(), 24);
    assert_eq!(db.min_data_page_id(), 4);
    assert_eq!(db.num_avail_data_pages(), 4);

    let mut data = [0u8; 8];
    // Keys on reclaimed pages are gone.
    assert!(!db.get(1, &mut data)?);
    // Oldest live page starts at key 169; the buffered tail runs to
    // 1023.
    for key in (169..=1023).step_by(41) {
        assert!(db.get(key, &mut data)?, "key {} missing", key);
        assert_eq!(u64::from_le_bytes(data), u64::from(key));
    }
    assert!(db.get(1023, &mut data)?);
    Ok(())
}
