// src/services/sampler.rs

use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::ExamSettings;
use crate::models::exam_progress::QuestionSelection;
use crate::models::question::{QuestionBank, SamplingGroup};

/// Picks `count` distinct ids uniformly at random.
///
/// Shuffles the whole pool (Fisher-Yates) and keeps the first `count`. A pool
/// smaller than `count` is returned whole, shuffled.
pub fn select_subset<R: Rng + ?Sized>(question_ids: &[String], count: usize, rng: &mut R) -> Vec<String> {
    let mut pool = question_ids.to_vec();
    pool.sort();
    pool.dedup();
    pool.shuffle(rng);
    pool.truncate(count);
    pool
}

/// Draws the written and audio samples for a new attempt.
///
/// Must run once per attempt; the result is persisted with the progress.
pub fn generate_selection<R: Rng + ?Sized>(
    bank: &QuestionBank,
    settings: &ExamSettings,
    rng: &mut R,
) -> QuestionSelection {
    QuestionSelection {
        written_question_ids: select_subset(
            &bank.pool(SamplingGroup::Written),
            settings.written_sample_size,
            rng,
        ),
        audio_question_ids: select_subset(
            &bank.pool(SamplingGroup::Audio),
            settings.audio_sample_size,
            rng,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("q{}", i)).collect()
    }

    #[test]
    fn returns_exactly_count_unique_ids_from_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        for pool_size in 5..=12 {
            let pool = ids(pool_size);
            for _ in 0..50 {
                let picked = select_subset(&pool, 5, &mut rng);
                assert_eq!(picked.len(), 5);
                let unique: HashSet<_> = picked.iter().collect();
                assert_eq!(unique.len(), 5);
                assert!(picked.iter().all(|id| pool.contains(id)));
            }
        }
    }

    #[test]
    fn small_pool_is_returned_whole() {
        let mut rng = StdRng::seed_from_u64(1);
        let picked = select_subset(&ids(3), 5, &mut rng);
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn every_id_can_be_drawn() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = ids(10);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.extend(select_subset(&pool, 5, &mut rng));
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn selection_draws_from_sampled_sections() {
        let bank = QuestionBank::bundled().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let selection = generate_selection(&bank, &ExamSettings::default(), &mut rng);

        let written = bank.section("section1_standard").unwrap();
        let audio = bank.section("section2_standard").unwrap();
        assert_eq!(selection.written_question_ids.len(), 5);
        assert_eq!(selection.audio_question_ids.len(), 5);
        assert!(selection.written_question_ids.iter().all(|id| written.question(id).is_some()));
        assert!(selection.audio_question_ids.iter().all(|id| audio.question(id).is_some()));
    }
}
