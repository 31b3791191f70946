mod common;

use common::{random_bases, Lcg};
use fqc_core::consensus::{
    compute_delta, decode_noise, encode_noise, find_best_alignment, reconstruct_from_delta, reverse_complement,
    AlignConfig, ClusterArena, ConsensusSequence, Strand,
};

const ALPHABET: &[u8; 5] = b"ACGTN";

fn strand(rng: &mut Lcg) -> Strand {
    if rng.below(2) == 0 {
        Strand::Forward
    } else {
        Strand::Reverse
    }
}

#[test]
fn test_reconstruct_any_placement() {
    let mut rng = Lcg::new(0x5eed);
    let consensus = random_bases(&mut rng, 200);
    for _ in 0..500 {
        let len = 1 + rng.below(180);
        let mut read = random_bases(&mut rng, len);
        if rng.below(4) == 0 {
            read[rng.below(len)] = b'N';
        }
        let shift = rng.below(300) as i64 - 60;
        let strand = strand(&mut rng);

        let delta = compute_delta(&read, &consensus, shift, strand);
        assert_eq!(delta.length, len);
        assert_eq!(
            reconstruct_from_delta(&delta, &consensus).unwrap(),
            read,
            "shift {shift} strand {strand:?} len {len}"
        );
    }
}

#[test]
fn test_delta_of_exact_window_is_empty() {
    let mut rng = Lcg::new(2);
    let consensus = random_bases(&mut rng, 120);
    let read = consensus[30..90].to_vec();
    let delta = compute_delta(&read, &consensus, 30, Strand::Forward);
    assert!(delta.mismatches.is_empty());
    assert!(delta.head.is_empty() && delta.tail.is_empty());

    let rc = reverse_complement(&read);
    let delta = compute_delta(&rc, &consensus, 30, Strand::Reverse);
    assert!(delta.mismatches.is_empty());
    assert_eq!(reconstruct_from_delta(&delta, &consensus).unwrap(), rc);
}

#[test]
fn test_overhangs_become_literals() {
    let consensus = b"ACGTACGTAC";
    let read = b"TTTACGTACGTACGGG";
    let delta = compute_delta(read, consensus, -3, Strand::Forward);
    assert_eq!(delta.head, b"TTT");
    assert_eq!(delta.tail, b"GGG");
    assert!(delta.mismatches.is_empty());
    assert_eq!(reconstruct_from_delta(&delta, consensus).unwrap(), read);
}

#[test]
fn test_corrupt_delta_rejected() {
    let consensus = b"ACGTACGTAC";
    let mut delta = compute_delta(b"ACGAACGT", consensus, 0, Strand::Forward);
    assert_eq!(delta.mismatches, vec![(3, encode_noise(b'T', b'A'))]);

    delta.mismatches[0].0 = 40;
    assert!(reconstruct_from_delta(&delta, consensus).is_err());

    delta.mismatches[0] = (3, 9);
    assert!(reconstruct_from_delta(&delta, consensus).is_err());

    delta.mismatches.clear();
    delta.tail = b"X".to_vec();
    assert!(reconstruct_from_delta(&delta, consensus).is_err());
}

#[test]
fn test_noise_codes_invert_over_alphabet() {
    for &reference in ALPHABET {
        for &base in ALPHABET {
            let code = encode_noise(reference, base);
            assert!(code <= 4);
            assert_eq!(decode_noise(reference, code), Some(base), "{} -> {}", reference as char, base as char);
        }
    }
}

#[test]
fn test_alignment_finds_planted_placement() {
    let mut rng = Lcg::new(77);
    let consensus = random_bases(&mut rng, 300);
    let cfg = AlignConfig::default();

    let mut read = consensus[50..150].to_vec();
    read[10] = if read[10] == b'A' { b'C' } else { b'A' };
    read[70] = b'N';
    let hit = find_best_alignment(&read, &consensus, 40, &cfg).unwrap();
    assert_eq!(hit.shift, 50);
    assert_eq!(hit.strand, Strand::Forward);
    assert_eq!(hit.mismatches, 2);

    let rc = reverse_complement(&consensus[100..180]);
    let hit = find_best_alignment(&rc, &consensus, 90, &cfg).unwrap();
    assert_eq!(hit.shift, 100);
    assert_eq!(hit.strand, Strand::Reverse);
    assert_eq!(hit.mismatches, 0);

    // Outside the search window around the anchor.
    assert!(find_best_alignment(&consensus[200..280], &consensus, 0, &cfg).is_none());
}

#[test]
fn test_alignment_rejects_unrelated_reads() {
    let mut rng = Lcg::new(78);
    let consensus = random_bases(&mut rng, 200);
    let cfg = AlignConfig::default();
    for _ in 0..20 {
        let read = random_bases(&mut rng, 100);
        assert!(find_best_alignment(&read, &consensus, 0, &cfg).is_none());
    }
    assert!(find_best_alignment(b"", &consensus, 0, &cfg).is_none());
    assert!(find_best_alignment(b"ACGT", b"", 0, &cfg).is_none());
}

#[test]
fn test_majority_vote_and_ties() {
    let mut c = ConsensusSequence::init_from_read(b"AAAA");
    c.add_read(b"CCCC", 0, Strand::Forward);
    c.recompute_consensus();
    assert_eq!(c.sequence(), b"AAAA");

    c.add_read(b"CCCC", 0, Strand::Forward);
    c.recompute_consensus();
    assert_eq!(c.sequence(), b"CCCC");
    assert_eq!(c.base_counts()[0], [1, 2, 0, 0]);

    // Reverse strand votes for the complement; extension past the end grows columns.
    c.add_read(b"GGGGGG", 2, Strand::Reverse);
    assert_eq!(c.len(), 8);
    c.recompute_consensus();
    assert_eq!(c.sequence(), b"CCCCCCCC");
    assert_eq!(c.contributing_reads(), 4);
}

#[test]
fn test_n_only_columns_stay_n() {
    let mut c = ConsensusSequence::init_from_read(b"ANNA");
    c.recompute_consensus();
    assert_eq!(c.sequence(), b"ANNA");
}

#[test]
fn test_arena_ids_are_sequential_and_reset() {
    let mut arena = ClusterArena::new();
    let a = arena.open(b"ACGT");
    let b = arena.open(b"TTTT");
    assert_eq!((a.0, b.0), (0, 1));
    assert_eq!(arena.get(b).sequence(), b"TTTT");
    arena.get_mut(a).add_read(b"ACGTAA", 0, Strand::Forward);
    assert_eq!(arena.get(a).len(), 6);
    assert_eq!(arena.iter().count(), 2);
    arena.clear();
    assert!(arena.is_empty());
    assert_eq!(arena.open(b"G").0, 0);
}
