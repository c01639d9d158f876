//! CLI tests

use clap::{CommandFactory, Parser};

use super::*;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "entente",
        "conflicts",
        "list",
        "--status",
        "under_review",
        "--type",
        "duplicate_entity",
        "--format",
        "json",
        "--database",
        "/tmp/graph.db",
    ])
    .unwrap();

    assert!(cli.format == OutputFormat::Json);
    assert_eq!(cli.database, Some(PathBuf::from("/tmp/graph.db")));
    match cli.command {
        Commands::Conflicts {
            action:
                ConflictAction::List {
                    status,
                    conflict_type,
                    skip,
                    ..
                },
        } => {
            assert_eq!(status, Some(ConflictStatus::UnderReview));
            assert_eq!(conflict_type, Some(ConflictType::DuplicateEntity));
            assert_eq!(skip, 0);
        }
        _ => panic!("expected conflicts list"),
    }
}

#[test]
fn test_unknown_enum_values_rejected() {
    assert!(Cli::try_parse_from(["entente", "conflicts", "list", "--severity", "urgent"]).is_err());
    assert!(
        Cli::try_parse_from([
            "entente", "resolve", "manual", "c1", "--method", "flip_a_coin", "--expert", "alice",
            "--reasoning", "x",
        ])
        .is_err()
    );
}

#[test]
fn test_detect_repeatable_entity_ids() {
    let cli = Cli::try_parse_from([
        "entente",
        "detect",
        "--entity-id",
        "e1",
        "--entity-id",
        "e2",
        "--dry-run",
    ])
    .unwrap();

    match cli.command {
        Commands::Detect {
            entity_ids,
            dry_run,
            batch_size,
        } => {
            assert_eq!(entity_ids, vec!["e1", "e2"]);
            assert!(dry_run);
            assert_eq!(batch_size, None);
        }
        _ => panic!("expected detect"),
    }
}

#[test]
fn test_batch_detect_requires_ids() {
    assert!(Cli::try_parse_from(["entente", "batch-detect"]).is_err());
}

#[test]
fn test_manual_resolution_args() {
    let cli = Cli::try_parse_from([
        "entente",
        "resolve",
        "manual",
        "c1",
        "--method",
        "merge_entities",
        "--expert",
        "alice",
        "--reasoning",
        "same person",
        "--actions",
        r#"{"merge_strategy": "prefer_target"}"#,
    ])
    .unwrap();

    match cli.command {
        Commands::Resolve {
            action:
                ResolveAction::Manual {
                    method, actions, ..
                },
        } => {
            assert_eq!(method, ResolutionMethod::MergeEntities);
            assert!(actions.unwrap().contains("prefer_target"));
        }
        _ => panic!("expected resolve manual"),
    }
}
