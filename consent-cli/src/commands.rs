//! Command handlers for the CLI

use consent_core::{Actor, SchemaName, VersionedObject};
use consent_db::{EngineConfig, RepairOutcome, RevisionService};
use serde::Serialize;
use std::path::Path;

use crate::{ActorArgs, Commands};

type CmdResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

impl ActorArgs {
    fn actor(&self) -> Actor {
        if self.individual {
            Actor::individual(self.actor.clone())
        } else {
            Actor::other(self.actor.clone())
        }
    }
}

/// Run one command against the configured stores
pub async fn run(command: Commands, config: &EngineConfig) -> CmdResult {
    let service = RevisionService::open(config)?;

    match command {
        Commands::Create {
            schema,
            file,
            organisation,
            actor,
        } => {
            let object = read_object(schema, &file)?;
            let revision = service.create(&object, &organisation, &actor.actor()).await?;
            print_json(&revision)
        }

        Commands::Update { schema, file, actor } => {
            let object = read_object(schema, &file)?;
            let revision = service.update(&object, &actor.actor()).await?;
            print_json(&revision)
        }

        Commands::Delete { schema, id, actor } => {
            service.soft_delete(schema, &id, &actor.actor()).await?;
            println!("Deleted {} {}", schema, id);
            Ok(())
        }

        Commands::History { object_id } => {
            let revisions = service.history(&object_id).await?;
            if revisions.is_empty() {
                println!("No revisions for {}", object_id);
                return Ok(());
            }
            for revision in &revisions {
                println!(
                    "{}  {}  {}  {}",
                    revision.timestamp_string(),
                    revision.id,
                    revision.serialized_hash,
                    revision
                        .actor()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        }

        Commands::Show { revision_id } => {
            let revision = service.revision(&revision_id).await?;
            print_json(&revision)
        }

        Commands::Recreate { schema, revision_id } => {
            let object = service.recreate_object(schema, &revision_id).await?;
            print_json(&object)
        }

        Commands::Verify { object_id } => {
            let report = service.verify(&object_id).await?;
            print_json(&report)?;
            if report.is_valid {
                Ok(())
            } else {
                Err(format!("revision chain of {} is invalid", object_id).into())
            }
        }

        Commands::Repair {
            schema,
            id,
            organisation,
        } => {
            match service.repair_object(schema, &id, &organisation).await? {
                RepairOutcome::InSync => println!("{} {} already matches its chain head", schema, id),
                RepairOutcome::Repaired => println!("{} {} rewritten from its chain head", schema, id),
            }
            Ok(())
        }

        Commands::Reconcile { organisation } => {
            let report = service.reconcile_all(&organisation).await?;
            print_json(&report)?;
            if report.failed.is_empty() {
                Ok(())
            } else {
                Err(format!("{} objects could not be reconciled", report.failed.len()).into())
            }
        }

        Commands::Stats => {
            let stats = service.stats().await?;
            println!("Revisions:       {}", stats.total_revisions);
            println!("Chains:          {}", stats.chains);
            println!("Live objects:    {}", stats.live_objects);
            println!("Deleted objects: {}", stats.deleted_objects);
            Ok(())
        }
    }
}

fn read_object(schema: SchemaName, path: &Path) -> Result<VersionedObject, Box<dyn std::error::Error + Send + Sync>> {
    let text = std::fs::read_to_string(path)?;
    Ok(VersionedObject::from_json_str(schema, &text)?)
}

fn print_json<T: Serialize>(data: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}
