#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.database.url, "sqlite://./data/ferrodock.db");
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.engine.timeout_secs, 1800);
        assert_eq!(config.jobs.max_active_per_user, 100);
        assert!(config.engine.binary.is_none());
    }

    #[test]
    fn test_default_retry_schedule() {
        let policy = Config::default().retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(5), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [engine]
            binary = "/opt/vina/bin/vina"
            timeout_secs = 600

            [jobs]
            retention_days = 30

            [preparation]
            torsion_tree = false
            "#,
        )
        .unwrap();

        let engine = config.engine_options();
        assert_eq!(engine.binary, Some(PathBuf::from("/opt/vina/bin/vina")));
        assert_eq!(engine.timeout, Duration::from_secs(600));

        let jobs = config.job_settings();
        assert_eq!(jobs.retention, chrono::Duration::days(30));
        assert_eq!(jobs.job_estimate, Duration::from_secs(300));

        let prep = config.preparation_options();
        assert!(!prep.ligand.torsion_tree);
        assert!(prep.ligand.optimize);
        assert!(prep.protein.keep_metals);
    }

    #[test]
    fn test_launcher_prefix_parsed() {
        let config = Config::from_toml(
            r#"
            [engine]
            launcher = ["docker", "run", "--rm", "vina"]
            "#,
        )
        .unwrap();
        assert_eq!(config.engine_options().launcher.len(), 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml("[workers]\ncount = 0\n").is_err());
        assert!(Config::from_toml("[retry]\ninitial_backoff_secs = 600\n").is_err());
        assert!(Config::from_toml("[engine]\ntimeout_secs = \"soon\"\n").is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.workspace.path, "./data/jobs");
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferrodock.toml");
        std::fs::write(&path, "[workers]\ncount = 6\n[workspace]\npath = \"/srv/dock\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        let runner = config.runner_settings();
        assert_eq!(runner.workers, 6);
        assert_eq!(runner.workspace, PathBuf::from("/srv/dock"));
        assert_eq!(runner.cleanup_interval, Duration::from_secs(3600));
    }
}
