mod common;

use common::{random_bases, Lcg};
use fqc_core::analyzer::read_minimizers;
use fqc_core::consensus::reverse_complement;
use fqc_core::{AnalyzerConfig, AssignmentPlan, ErrorKind, GlobalAnalyzer, MinimizerStrategy, SimilarityStrategy};

fn analyze(reads: &[Vec<u8>]) -> AssignmentPlan {
    let views: Vec<&[u8]> = reads.iter().map(Vec::as_slice).collect();
    GlobalAnalyzer::new(AnalyzerConfig::default())
        .unwrap()
        .analyze(&views)
        .unwrap()
}

#[test]
fn test_similar_reads_are_chained() {
    let mut rng = Lcg::new(31);
    let a = random_bases(&mut rng, 100);
    let b = random_bases(&mut rng, 100);
    let mut a2 = a.clone();
    a2[50] = if a2[50] == b'A' { b'C' } else { b'A' };
    let mut b2 = b.clone();
    b2[10] = b'N';

    let plan = analyze(&[a, b, a2, b2]);
    assert_eq!(plan.archive_order, vec![0, 2, 1, 3]);
    assert_eq!(plan.cluster_boundaries, vec![0, 2]);
    assert_eq!(plan.cluster_count(), 2);
    assert!(!plan.is_identity());
}

#[test]
fn test_reverse_complement_counts_as_similar() {
    let mut rng = Lcg::new(32);
    let a = random_bases(&mut rng, 120);
    let b = random_bases(&mut rng, 120);
    let rc = reverse_complement(&a);
    assert_eq!(read_minimizers(&a, 23, 12), read_minimizers(&rc, 23, 12));

    let plan = analyze(&[a, b, rc]);
    assert_eq!(plan.archive_order, vec![0, 2, 1]);
}

#[test]
fn test_plan_is_a_permutation() {
    let mut rng = Lcg::new(33);
    let seeds: Vec<Vec<u8>> = (0..40).map(|_| random_bases(&mut rng, 90)).collect();
    let reads: Vec<Vec<u8>> = (0..600)
        .map(|_| {
            let mut r = seeds[rng.below(seeds.len())].clone();
            let at = rng.below(r.len());
            r[at] = b"ACGT"[rng.below(4)];
            r
        })
        .collect();

    let plan = analyze(&reads);
    let mut seen = plan.archive_order.clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..600).collect::<Vec<u64>>());
    assert_eq!(plan.cluster_boundaries[0], 0);
    assert!(plan.cluster_boundaries.windows(2).all(|w| w[0] < w[1]));
    assert!(plan.cluster_count() <= 60, "{} clusters", plan.cluster_count());

    let map = plan.reorder_map().unwrap();
    for (archive, &original) in plan.archive_order.iter().enumerate() {
        assert_eq!(map.archive_id(original), archive as u64);
    }
    // Deterministic across runs.
    assert_eq!(analyze(&reads), plan);
}

#[test]
fn test_disabled_or_trivial_input_is_identity() {
    let config = AnalyzerConfig {
        enable_reorder: false,
        ..AnalyzerConfig::default()
    };
    let analyzer = GlobalAnalyzer::new(config).unwrap();
    let reads: Vec<&[u8]> = vec![b"ACGT", b"TTTT", b"ACGT"];
    assert!(analyzer.analyze(&reads).unwrap().is_identity());

    let analyzer = GlobalAnalyzer::new(AnalyzerConfig::default()).unwrap();
    assert!(analyzer.analyze(&[]).unwrap().is_empty());
    assert!(analyzer.analyze(&[b"ACGT".as_slice()]).unwrap().is_identity());
}

#[test]
fn test_reads_without_minimizers_keep_input_order() {
    let reads: Vec<Vec<u8>> = vec![b"ACGT".to_vec(), b"NNNNNNNNNNNNNNNNNNNNNNNNNNNNNN".to_vec(), Vec::new()];
    let plan = analyze(&reads);
    assert_eq!(plan.archive_order, vec![0, 1, 2]);
    assert_eq!(plan.cluster_boundaries, vec![0, 1, 2]);
}

#[test]
fn test_block_ranges_and_boundaries() {
    let plan = AssignmentPlan {
        archive_order: (0..10).collect(),
        cluster_boundaries: vec![0, 3, 4, 8],
    };
    assert_eq!(plan.block_boundaries(4), vec![0..4, 4..8, 8..10]);
    assert_eq!(plan.boundaries_within(0..4), vec![0, 3]);
    assert_eq!(plan.boundaries_within(4..8), vec![0]);
    assert_eq!(plan.boundaries_within(8..10), vec![0]);
    assert!(AssignmentPlan::identity(0).block_boundaries(4).is_empty());
}

#[test]
fn test_config_validation() {
    for (k, w, search) in [(0, 12, 10), (32, 12, 10), (23, 0, 10), (23, 12, 0)] {
        let config = AnalyzerConfig {
            minimizer_k: k,
            minimizer_w: w,
            max_search: search,
            ..AnalyzerConfig::default()
        };
        let err = GlobalAnalyzer::new(config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

struct DropLast;

impl SimilarityStrategy for DropLast {
    fn name(&self) -> &'static str {
        "drop-last"
    }

    fn order(&self, reads: &[&[u8]]) -> AssignmentPlan {
        AssignmentPlan::identity(reads.len() - 1)
    }
}

#[test]
fn test_custom_strategy_output_is_checked() {
    let analyzer = GlobalAnalyzer::with_strategy(AnalyzerConfig::default(), Box::new(DropLast)).unwrap();
    let reads: Vec<&[u8]> = vec![b"ACGT", b"TTTT"];
    let err = analyzer.analyze(&reads).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    let default = GlobalAnalyzer::with_strategy(AnalyzerConfig::default(), Box::new(MinimizerStrategy::default())).unwrap();
    assert_eq!(default.analyze(&reads).unwrap().len(), 2);
}
