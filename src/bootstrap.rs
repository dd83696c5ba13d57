//! Non-parametric bootstrap support.
//!
//! Replicate seeds are drawn from the caller's generator before any work is
//! dispatched, so the support values depend only on the master seed and not
//! on how the replicates are scheduled across threads.

use crate::alignment::Alignment;
use crate::error::Result;
use crate::model::Model;
use crate::pool;
use crate::report::BranchSupport;
use crate::search::{SearchConfig, search_ml};
use crate::snapshot::{TreeSnapshot, node_splits};
use crate::tree::Tree;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

/// Search `config.bootstrap_replicates` resampled alignments and label each
/// internal node of `tree` with the percentage of replicate trees that
/// contain its split.
///
/// Labels are rounded to whole percentages; the returned list keeps the
/// exact values.
pub fn annotate_support<R: Rng>(
    alignment: &Alignment,
    model: &Model,
    config: &SearchConfig,
    tree: &mut Tree,
    rng: &mut R,
) -> Result<Vec<BranchSupport>> {
    let replicates = config.bootstrap_replicates;
    if replicates == 0 {
        return Ok(Vec::new());
    }
    let seeds: Vec<u64> = (0..replicates).map(|_| rng.random()).collect();
    let inner = SearchConfig { bootstrap_replicates: 0, threads: 1, ..config.clone() };

    log::info!("running {replicates} bootstrap replicates on {} threads", pool::resolve_threads(config.threads));
    let replicate_trees: Vec<Result<Tree>> = pool::install(config.threads, || {
        seeds
            .par_iter()
            .enumerate()
            .map(|(i, &seed)| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                let resampled = alignment.resample_columns(&mut rng);
                let outcome = search_ml(&resampled, model, &inner, &mut rng)?;
                log::debug!("bootstrap replicate {i}: lnL {:.4}", outcome.log_likelihood);
                Ok(outcome.tree)
            })
            .collect()
    })?;

    let mut taxa = alignment.names().to_vec();
    taxa.sort();
    let snapshots = replicate_trees
        .into_iter()
        .map(|t| t.and_then(|t| TreeSnapshot::with_taxa(&t, &taxa)))
        .collect::<Result<Vec<_>>>()?;

    let splits = node_splits(tree, &taxa)?;
    let mut support = Vec::new();
    for (id, split) in splits.into_iter().enumerate() {
        let Some(split) = split else { continue };
        let hits = snapshots.iter().filter(|s| s.contains(&split)).count();
        let value = 100.0 * hits as f64 / replicates as f64;
        tree.node_mut(id).name = Some(format!("{}", value.round() as u32));
        support.push(BranchSupport { split: split.iter_ones().map(|i| taxa[i].clone()).collect(), support: value });
    }
    Ok(support)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelParameters;
    use crate::newick::{parse_newick, to_newick};
    use crate::search::build_tree;
    use crate::simulate::simulate_alignment;

    fn simulated(width: usize) -> Alignment {
        let tree = parse_newick("((A:0.05,B:0.05):0.4,C:0.05,(D:0.05,E:0.05):0.4);").unwrap();
        let params = ModelParameters::initial("JC".parse::<Model>().unwrap(), &[0.25; 4]);
        simulate_alignment(&tree, &params, width, &mut Xoshiro256PlusPlus::seed_from_u64(21)).unwrap()
    }

    fn config(threads: usize) -> SearchConfig {
        SearchConfig {
            seed: 1,
            threads,
            bootstrap_replicates: 10,
            max_iterations: 3,
            unsuccessful_stop: 2,
            random_starts: 0,
            ..SearchConfig::default()
        }
    }

    #[test]
    fn strong_splits_get_full_support() {
        let aln = simulated(300);
        let result = build_tree(&aln, &"JC".parse().unwrap(), &config(2)).unwrap();
        assert_eq!(result.support.len(), 2);
        for s in &result.support {
            assert!((0.0..=100.0).contains(&s.support));
            assert!(s.support >= 90.0, "split {:?} only {}", s.split, s.support);
        }
        let splits: Vec<&Vec<String>> = result.support.iter().map(|s| &s.split).collect();
        assert!(splits.iter().any(|s| *s == &["D".to_string(), "E".to_string()]));
        let labelled = parse_newick(&result.tree).unwrap();
        let labels: Vec<u32> = labelled
            .preorder()
            .into_iter()
            .filter(|&id| !labelled.is_leaf(id) && id != labelled.root())
            .map(|id| labelled.node(id).name.as_deref().unwrap().parse().unwrap())
            .collect();
        assert_eq!(labels.len(), 2);
        assert!(labels.iter().all(|&l| l >= 90));
    }

    #[test]
    fn support_does_not_depend_on_thread_count() {
        let aln = simulated(40);
        let model: Model = "JC".parse().unwrap();
        let one = build_tree(&aln, &model, &config(1)).unwrap();
        let four = build_tree(&aln, &model, &config(4)).unwrap();
        assert_eq!(one.support, four.support);
        assert_eq!(one.tree, four.tree);
    }

    #[test]
    fn labels_replace_internal_names() {
        let aln = simulated(60);
        let mut tree = parse_newick("((A:0.1,B:0.1)x:0.1,C:0.1,(D:0.1,E:0.1)y:0.1);").unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let support = annotate_support(&aln, &"JC".parse().unwrap(), &config(1), &mut tree, &mut rng).unwrap();
        assert_eq!(support.len(), 2);
        let text = to_newick(&tree);
        assert!(!text.contains('x') && !text.contains('y'));
    }
}
