mod common;

use common::Lcg;
use fqc_core::reorder_map::{delta_decode, delta_encode, verify_map_consistency};
use fqc_core::varint::{put_signed, put_varint};
use fqc_core::{ErrorKind, ReorderMapData};

/// Fisher-Yates over `0..n` driven by the test LCG.
fn shuffled(n: usize, seed: u64) -> Vec<u64> {
    let mut rng = Lcg::new(seed);
    let mut ids: Vec<u64> = (0..n as u64).collect();
    for i in (1..n).rev() {
        ids.swap(i, rng.below(i + 1));
    }
    ids
}

#[test]
fn test_serialize_roundtrip_random_permutation() {
    let map = ReorderMapData::from_archive_order(shuffled(5000, 1)).unwrap();
    let bytes = map.serialize();
    let back = ReorderMapData::deserialize(&bytes).unwrap();
    assert_eq!(back, map);
    for original in [0u64, 17, 4999] {
        assert_eq!(back.original_id(back.archive_id(original)), original);
    }
}

#[test]
fn test_directions_are_inverse() {
    let order = vec![3u64, 0, 4, 1, 2];
    let map = ReorderMapData::from_archive_order(order.clone()).unwrap();
    assert_eq!(map.reverse_map(), &order[..]);
    assert_eq!(map.forward_map(), &[1, 3, 4, 0, 2]);
    assert!(verify_map_consistency(map.forward_map(), map.reverse_map()));
    // Out-of-range lookups pass through unchanged.
    assert_eq!(map.archive_id(99), 99);
    assert_eq!(map.original_id(99), 99);
}

#[test]
fn test_rejects_non_bijections() {
    let err = ReorderMapData::from_forward(vec![0, 2, 2]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    let err = ReorderMapData::from_forward(vec![0, 5]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    let err = ReorderMapData::new(vec![1, 0], vec![0, 1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    assert!(ReorderMapData::new(vec![1, 0], vec![1, 0]).is_ok());
}

#[test]
fn test_clustered_order_is_compact() {
    // Runs of consecutive ids, the shape reordering produces.
    let mut order = Vec::new();
    for run in shuffled(100, 7) {
        order.extend(run * 100..run * 100 + 100);
    }
    let map = ReorderMapData::from_archive_order(order).unwrap();
    let stats = map.stats();
    assert_eq!(stats.total_reads, 10_000);
    assert!(stats.bytes_per_read < 2.5, "{} bytes per read", stats.bytes_per_read);
    assert!(stats.compression_ratio > 3.0);
    assert_eq!(stats.total_bytes, map.serialize().len());
}

#[test]
fn test_combine_chunks_offsets_both_directions() {
    let a = ReorderMapData::from_archive_order(vec![1, 0, 2]).unwrap();
    let b = ReorderMapData::from_archive_order(vec![1, 0]).unwrap();
    let combined = ReorderMapData::combine_chunks(&[a, b], &[3, 2]).unwrap();
    assert_eq!(combined.reverse_map(), &[1, 0, 2, 4, 3]);
    assert_eq!(combined.forward_map(), &[1, 0, 2, 4, 3]);

    let single = ReorderMapData::identity(4);
    let err = ReorderMapData::combine_chunks(&[single.clone()], &[5]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = ReorderMapData::combine_chunks(&[single], &[4, 1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_truncated_or_altered_bytes_rejected() {
    let map = ReorderMapData::from_archive_order(shuffled(300, 3)).unwrap();
    let bytes = map.serialize();

    assert!(ReorderMapData::deserialize(&bytes[..20]).is_err());
    assert!(ReorderMapData::deserialize(&bytes[..bytes.len() - 1]).is_err());

    let mut future = bytes.clone();
    future[4] = 9;
    assert!(ReorderMapData::deserialize(&future).is_err());

    // A reverse map that does not invert the forward map.
    let mut scrambled = ReorderMapData::from_archive_order(shuffled(300, 4)).unwrap().serialize();
    scrambled.truncate(32);
    let mut body = delta_encode(map.forward_map());
    let reverse = delta_encode(&shuffled(300, 5));
    scrambled[16..24].copy_from_slice(&(body.len() as u64).to_le_bytes());
    scrambled[24..32].copy_from_slice(&(reverse.len() as u64).to_le_bytes());
    body.extend_from_slice(&reverse);
    scrambled.extend_from_slice(&body);
    let err = ReorderMapData::deserialize(&scrambled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
}

#[test]
fn test_corrupt_header_fields_are_errors() {
    let bytes = ReorderMapData::from_archive_order(vec![2, 0, 1]).unwrap().serialize();
    let patched = |at: usize, field: &[u8]| {
        let mut b = bytes.clone();
        b[at..at + field.len()].copy_from_slice(field);
        ReorderMapData::deserialize(&b).unwrap_err().kind()
    };

    // header_size past the end of the buffer
    assert_eq!(patched(0, &1000u32.to_le_bytes()), ErrorKind::InvalidFormat);
    // more reads than the streams could possibly hold
    assert_eq!(patched(8, &(1u64 << 61).to_le_bytes()), ErrorKind::InvalidFormat);
    assert_eq!(patched(8, &4u64.to_le_bytes()), ErrorKind::InvalidFormat);
    // stream sizes that overflow when summed
    let mut b = bytes.clone();
    b[8..16].copy_from_slice(&0u64.to_le_bytes());
    b[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
    b[24..32].copy_from_slice(&1u64.to_le_bytes());
    assert_eq!(ReorderMapData::deserialize(&b).unwrap_err().kind(), ErrorKind::InvalidFormat);
}

#[test]
fn test_delta_decode_rejects_out_of_range_ids() {
    assert!(delta_decode(&[0], usize::MAX >> 3).is_err());

    let mut huge_first = Vec::new();
    put_varint(&mut huge_first, u64::MAX);
    assert!(delta_decode(&huge_first, 1).is_err());

    let mut overflow = Vec::new();
    put_varint(&mut overflow, i64::MAX as u64);
    put_signed(&mut overflow, 1);
    assert_eq!(delta_decode(&overflow, 2).unwrap_err().kind(), ErrorKind::InvalidFormat);

    let mut negative = Vec::new();
    put_varint(&mut negative, 1);
    put_signed(&mut negative, -2);
    assert!(delta_decode(&negative, 2).is_err());
}

#[test]
fn test_delta_codec_handles_descending_ids() {
    let ids = vec![900u64, 3, 4, 5, 899, 0];
    let bytes = delta_encode(&ids);
    assert_eq!(delta_decode(&bytes, ids.len()).unwrap(), ids);
    assert!(delta_decode(&bytes, ids.len() + 1).is_err());
    assert!(delta_decode(&bytes, ids.len() - 1).is_err());
}

#[test]
fn test_empty_map() {
    let map = ReorderMapData::identity(0);
    assert!(map.is_empty());
    let back = ReorderMapData::deserialize(&map.serialize()).unwrap();
    assert!(back.is_empty());
}
