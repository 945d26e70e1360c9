use spindle::analyzer;
use spindle::config::{Config, EpisodeMappingStrategy};
use spindle::monitor::{DiscInfo, DiscType};
use spindle::queue::{ItemState, QueueStore};
use spindle::ripper;
use spindle::tmdb::{EpisodeInfo, MediaInfo, MediaKind};
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &tempfile::TempDir) -> Config {
        Config {
            staging_dir: dir.path().join("staging"),
            library_dir: dir.path().join("library"),
            log_dir: dir.path().join("logs"),
            review_dir: dir.path().join("review"),
            tmdb_api_key: Some("test-key".to_string()),
            ..Default::default()
        }
    }

    fn movie_info() -> MediaInfo {
        MediaInfo {
            title: "Blazing Saddles".to_string(),
            year: 1974,
            kind: MediaKind::Movie,
            tmdb_id: 644,
            overview: "The railroad's got to run through Rock Ridge.".to_string(),
            genres: vec!["Comedy".to_string(), "Western".to_string()],
            season: None,
            episodes: vec![],
            confidence: 0.95,
        }
    }

    #[test]
    fn test_movie_pipeline_store_walk() {
        // Walk one item through every persisted transition of the happy
        // path and check the path invariants at each step.
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open(&dir.path().join("queue.db")).unwrap();

        let mut item = store.add_disc("BLAZING_SADDLES").unwrap();
        assert_eq!(item.state, ItemState::Pending);

        item.state = ItemState::Identifying;
        store.update(&item).unwrap();

        item.media_info = Some(movie_info());
        item.state = ItemState::Identified;
        store.update(&item).unwrap();

        item.state = ItemState::Ripping;
        store.update(&item).unwrap();

        let ripped = PathBuf::from("/staging/ripped/Blazing Saddles (1974).mkv");
        item.ripped_file = Some(ripped.clone());
        item.ripped_files = vec![ripped.clone()];
        item.state = ItemState::Ripped;
        store.update(&item).unwrap();

        let fetched = store.get(item.id).unwrap().unwrap();
        assert!(fetched.ripped_file.is_some(), "ripped implies ripped path");

        item.state = ItemState::Encoding;
        store.update(&item).unwrap();

        let encoded = PathBuf::from("/staging/encoded/Blazing Saddles (1974).mkv");
        item.encoded_file = Some(encoded.clone());
        item.encoded_files = vec![encoded];
        item.state = ItemState::Encoded;
        store.update(&item).unwrap();

        let fetched = store.get(item.id).unwrap().unwrap();
        assert!(fetched.encoded_file.is_some(), "encoded implies encoded path");

        item.state = ItemState::Organizing;
        store.update(&item).unwrap();

        item.final_file = Some(PathBuf::from(
            "/library/movies/Blazing Saddles (1974)/Blazing Saddles (1974).mkv",
        ));
        item.state = ItemState::Completed;
        store.update(&item).unwrap();

        let finished = store.get(item.id).unwrap().unwrap();
        assert_eq!(finished.state, ItemState::Completed);
        assert!(finished.final_file.is_some(), "completed implies final path");
        let info = finished.media_info.unwrap();
        assert_eq!(info.title, "Blazing Saddles");
        assert_eq!(info.year, 1974);
    }

    #[test]
    fn test_crash_recovery_resets_to_pre_stage_states() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open(&dir.path().join("queue.db")).unwrap();

        // Simulate a daemon killed mid-rip
        let mut ripping = store.add_disc("INTERRUPTED_RIP").unwrap();
        ripping.state = ItemState::Ripping;
        store.update(&ripping).unwrap();

        let mut encoding = store.add_disc("INTERRUPTED_ENCODE").unwrap();
        encoding.state = ItemState::Encoding;
        store.update(&encoding).unwrap();

        assert_eq!(store.reset_stuck_processing().unwrap(), 2);
        assert_eq!(
            store.get(ripping.id).unwrap().unwrap().state,
            ItemState::Identified
        );
        assert_eq!(
            store.get(encoding.id).unwrap().unwrap().state,
            ItemState::Ripped
        );

        // No processing states remain after recovery
        let stats = store.stats().unwrap();
        for state in [
            ItemState::Identifying,
            ItemState::Ripping,
            ItemState::Encoding,
            ItemState::Organizing,
        ] {
            assert_eq!(stats.get(&state), None);
        }
    }

    #[test]
    fn test_add_file_enters_as_ripped() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open(&dir.path().join("queue.db")).unwrap();

        let source = PathBuf::from("/downloads/Batman.S01E01.mkv");
        let item = store.add_file(&source).unwrap();

        let fetched = store.get(item.id).unwrap().unwrap();
        assert_eq!(fetched.state, ItemState::Ripped);
        assert_eq!(fetched.ripped_file, Some(source.clone()));
        assert_eq!(fetched.source_path, Some(source));
    }

    #[tokio::test]
    async fn test_analyzer_rejects_empty_title_list() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(temp_config(&dir));
        let analyzer = analyzer::DiscAnalyzer::new(config).unwrap();

        let disc = DiscInfo::new("/dev/sr0", DiscType::BluRay, "EMPTY_DISC");
        let err = analyzer.analyze(&disc, &[], None, None).await.unwrap_err();
        assert!(err.to_string().contains("no titles"));
    }

    #[test]
    fn test_tv_window_classification_boundaries() {
        let window = (18 * 60, 90 * 60);
        let title = |id: &str, secs: u64| ripper::Title::new(id, secs, 0, 1, Vec::new(), None);

        // Three identical in-window durations classify as a season disc
        let titles = vec![title("0", 1320), title("1", 1320), title("2", 1320)];
        assert_eq!(analyzer::find_tv_candidates(&titles, window).len(), 3);

        // Two titles in the window stay a movie candidate
        let titles = vec![title("0", 1320), title("1", 1320)];
        assert!(analyzer::find_tv_candidates(&titles, window).is_empty());
    }

    #[test]
    fn test_batman_season_disc_fixture() {
        // Scan fixture from a three-episode season disc plus junk titles
        let title = |id: &str, secs: u64| ripper::Title::new(id, secs, 0, 1, Vec::new(), None);
        let titles = vec![
            title("0", 1320),
            title("1", 1340),
            title("2", 1310),
            title("3", 180),
            title("4", 60),
        ];

        let window = (18 * 60, 90 * 60);
        let candidates = analyzer::find_tv_candidates(&titles, window);
        assert_eq!(candidates.len(), 3);

        let episodes: Vec<EpisodeInfo> = (1..=3)
            .map(|n| EpisodeInfo {
                season: 1,
                episode: n,
                name: Some(format!("Episode {n}")),
                runtime: Some(25),
            })
            .collect();
        let info = MediaInfo {
            title: "Batman".to_string(),
            year: 1966,
            kind: MediaKind::Tv,
            tmdb_id: 2287,
            overview: String::new(),
            genres: vec![],
            season: Some(1),
            episodes,
            confidence: 0.9,
        };

        let mapping = analyzer::build_episode_mapping(
            &candidates,
            Some(&info),
            1,
            EpisodeMappingStrategy::Hybrid,
            0,
        );
        assert_eq!(mapping.len(), 3);
        assert_eq!((mapping[0].season, mapping[0].episode), (1, 1));
        assert_eq!((mapping[1].season, mapping[1].episode), (1, 2));
        assert_eq!((mapping[2].season, mapping[2].episode), (1, 3));
    }

    #[test]
    fn test_second_disc_continues_episode_numbering() {
        let title = |id: &str, secs: u64| ripper::Title::new(id, secs, 0, 1, Vec::new(), None);
        let t0 = title("0", 1320);
        let t1 = title("1", 1320);
        let t2 = title("2", 1320);
        let candidates = vec![&t0, &t1, &t2];

        let episodes: Vec<EpisodeInfo> = (1..=9)
            .map(|n| EpisodeInfo {
                season: 1,
                episode: n,
                name: None,
                runtime: Some(25),
            })
            .collect();
        let info = MediaInfo {
            title: "Batman".to_string(),
            year: 1966,
            kind: MediaKind::Tv,
            tmdb_id: 2287,
            overview: String::new(),
            genres: vec![],
            season: Some(1),
            episodes,
            confidence: 0.9,
        };

        // Disc 2 of the season: skip the first disc's three episodes
        let mapping = analyzer::build_episode_mapping(
            &candidates,
            Some(&info),
            1,
            EpisodeMappingStrategy::Hybrid,
            3,
        );
        assert_eq!(mapping[0].episode, 4);
        assert_eq!(mapping[1].episode, 5);
        assert_eq!(mapping[2].episode, 6);
    }

    #[test]
    fn test_selection_rule_is_stable_across_calls() {
        let options = ripper::SelectionOptions {
            include_all_english_audio: true,
            include_commentary_tracks: true,
            include_alternate_audio: false,
        };
        let first = ripper::build_selection_rule(options);
        let second = ripper::build_selection_rule(options);
        assert_eq!(first, second);
        assert_eq!(first, "-sel:all,+sel:video,+sel:audio&(eng),-sel:subtitle");
    }

    #[test]
    fn test_terminal_states() {
        assert!(ItemState::Completed.is_terminal());
        assert!(ItemState::Failed.is_terminal());
        assert!(ItemState::Review.is_terminal());
        assert!(!ItemState::Pending.is_terminal());
        assert!(!ItemState::Ripping.is_terminal());

        assert!(ItemState::Identifying.is_processing());
        assert!(ItemState::Organizing.is_processing());
        assert!(!ItemState::Ripped.is_processing());
    }

    #[test]
    fn test_failed_item_keeps_error_until_retry_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open(&dir.path().join("queue.db")).unwrap();

        let mut item = store.add_disc("BROKEN_DISC").unwrap();
        item.state = ItemState::Failed;
        item.error_message = Some("invalid input stream".to_string());
        store.update(&item).unwrap();

        let failed = store.get(item.id).unwrap().unwrap();
        assert_eq!(failed.state, ItemState::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("invalid input stream"));
        assert!(failed.encoded_file.is_none());
        assert!(failed.final_file.is_none());

        // Retry semantics: back to pending with the error cleared
        let mut retried = failed;
        retried.state = ItemState::Pending;
        retried.error_message = None;
        store.update(&retried).unwrap();

        let fetched = store.get(item.id).unwrap().unwrap();
        assert_eq!(fetched.state, ItemState::Pending);
        assert!(fetched.error_message.is_none());
    }
}
