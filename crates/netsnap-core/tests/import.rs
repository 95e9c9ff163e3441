use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use netsnap_core::emit::{LABEL_NAME, Labels};
use netsnap_core::sink::{BlockReader, list_blocks};
use netsnap_core::{BlockStore, ImportConfig, ImportError, IngestionPipeline, Sink, SinkError, StationTable};
use tempfile::tempdir;

const DAY: Duration = Duration::from_secs(24 * 3600);

/// Sink that records every call in order.
#[derive(Default)]
struct RecordingSink {
    log: Vec<String>,
}

impl Sink for RecordingSink {
    fn append(&mut self, labels: &Labels, timestamp_us: i64, _value: f64) -> Result<(), SinkError> {
        self.log.push(format!("append {} {}", labels[LABEL_NAME], timestamp_us));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        self.log.push("commit".to_string());
        Ok(())
    }
}

fn attr(attr_type: u16, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((4 + value.len()) as u16).to_be_bytes());
    out.extend_from_slice(&attr_type.to_be_bytes());
    out.extend_from_slice(value);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

/// Big-endian NEW_STATION message with rx/tx byte counters.
fn station_dump(mac: [u8; 6], rx: u32, tx: u32) -> Vec<u8> {
    let mut info = attr(2, &rx.to_be_bytes());
    info.extend(attr(3, &tx.to_be_bytes()));

    let mut payload = vec![19, 1, 0, 0];
    payload.extend(attr(6, &mac));
    payload.extend(attr(21, &info));

    let mut msg = Vec::new();
    msg.extend_from_slice(&((16 + payload.len()) as u32).to_be_bytes());
    msg.extend_from_slice(&0x1cu16.to_be_bytes());
    msg.extend_from_slice(&0x2u16.to_be_bytes());
    msg.extend_from_slice(&1u32.to_be_bytes());
    msg.extend_from_slice(&0u32.to_be_bytes());
    msg.extend(payload);
    msg
}

fn write_archive(dir: &Path, start_us: i64, age: Duration, files: &[(String, Vec<u8>)]) {
    let path = dir.join(format!("{}.tar.gz", start_us));
    let file = fs::File::create(&path).unwrap();
    let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    let file = builder.into_inner().unwrap().finish().unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn snapshot(ts: i64, rx: u32) -> Vec<(String, Vec<u8>)> {
    vec![
        (
            format!("{ts}/nl80211/wlan0/stations/0000"),
            station_dump([0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01], rx, rx * 2),
        ),
        (
            format!("{ts}/sys/kernel/debug/ieee80211/phy0/ath9k/tpc"),
            b"DISABLED\n".to_vec(),
        ),
    ]
}

fn three_archives(dir: &Path) {
    // Written out of order on purpose; the oldest falls outside a 30-day window.
    write_archive(dir, 3_000_000, DAY, &snapshot(3_000_000, 30));
    write_archive(dir, 1_000_000, 60 * DAY, &snapshot(1_000_000, 10));
    write_archive(dir, 2_000_000, 2 * DAY, &snapshot(2_000_000, 20));
}

fn pipeline(dir: &Path) -> IngestionPipeline {
    let mut config = ImportConfig::new(dir);
    config.window = chrono::TimeDelta::days(30);
    IngestionPipeline::new(
        config,
        StationTable::from_pairs([("aa:bb:cc:00:00:01", "phone")]),
    )
}

#[test]
fn test_archives_committed_in_capture_order() {
    let dir = tempdir().unwrap();
    three_archives(dir.path());

    let p = pipeline(dir.path());
    let archives = p.select_archives(Utc::now()).unwrap();
    assert_eq!(
        archives.iter().map(|a| a.start_us).collect::<Vec<_>>(),
        vec![2_000_000, 3_000_000]
    );

    let mut sink = RecordingSink::default();
    let summary = p.run(&archives, &mut sink, None, |_, _| {}).unwrap();
    assert_eq!(summary.archives, 2);
    assert_eq!(summary.points, 6);

    assert_eq!(
        sink.log,
        vec![
            "append stainfo_rxbytes 2000000",
            "append stainfo_txbytes 2000000",
            "append tpc 2000000",
            "commit",
            "append stainfo_rxbytes 3000000",
            "append stainfo_txbytes 3000000",
            "append tpc 3000000",
            "commit",
        ]
    );
}

#[test]
fn test_block_store_round_trip() {
    let dir = tempdir().unwrap();
    let archive_dir = dir.path().join("archives");
    let block_dir = dir.path().join("blocks");
    fs::create_dir(&archive_dir).unwrap();
    three_archives(&archive_dir);

    let p = pipeline(&archive_dir);
    let archives = p.select_archives(Utc::now()).unwrap();
    let mut store = BlockStore::new(&block_dir).unwrap();
    p.run(&archives, &mut store, None, |_, _| {}).unwrap();

    let blocks = list_blocks(&block_dir).unwrap();
    assert_eq!(blocks.len(), 2);

    let first = BlockReader::open(&blocks[0]).unwrap();
    assert_eq!(first.metadata().min_timestamp_us, 2_000_000);
    let rx = first
        .series()
        .iter()
        .find(|s| s.labels[LABEL_NAME] == "stainfo_rxbytes")
        .unwrap();
    assert_eq!(rx.labels["station"], "phone");
    assert_eq!(rx.labels["netdev"], "wlan0");
    assert_eq!(rx.labels["job"], "nl80211");
    assert_eq!(rx.samples, vec![(2_000_000, 20.0)]);

    let tpc = first
        .series()
        .iter()
        .find(|s| s.labels[LABEL_NAME] == "tpc")
        .unwrap();
    assert_eq!(tpc.labels["phy"], "phy0");
    assert_eq!(tpc.samples, vec![(2_000_000, 0.0)]);

    let second = BlockReader::open(&blocks[1]).unwrap();
    assert_eq!(second.metadata().max_timestamp_us, 3_000_000);
}

#[test]
fn test_unmatched_entry_aborts_run() {
    let dir = tempdir().unwrap();
    write_archive(dir.path(), 1_000_000, DAY, &snapshot(1_000_000, 1));
    let mut bad = snapshot(2_000_000, 2);
    bad.push(("2000000/etc/hostname".to_string(), b"router\n".to_vec()));
    write_archive(dir.path(), 2_000_000, DAY, &bad);
    write_archive(dir.path(), 3_000_000, DAY, &snapshot(3_000_000, 3));

    let p = pipeline(dir.path());
    let archives = p.select_archives(Utc::now()).unwrap();
    let mut sink = RecordingSink::default();
    let err = p.run(&archives, &mut sink, None, |_, _| {}).unwrap_err();

    match err {
        ImportError::Entry { archive, entry, .. } => {
            assert!(archive.ends_with("2000000.tar.gz"));
            assert_eq!(entry, "2000000/etc/hostname");
        }
        other => panic!("unexpected error: {other}"),
    }
    // Only the first archive was committed; the third was never opened.
    assert_eq!(sink.log.iter().filter(|l| *l == "commit").count(), 1);
    assert!(!sink.log.iter().any(|l| l.ends_with("3000000")));
}

#[test]
fn test_last_n_keeps_newest() {
    let dir = tempdir().unwrap();
    three_archives(dir.path());

    let mut config = ImportConfig::new(dir.path());
    config.last_n = Some(1);
    let p = IngestionPipeline::new(config, StationTable::default());
    let archives = p.select_archives(Utc::now()).unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].start_us, 3_000_000);
}
