use {
    alder_skills::{
        LifecycleOrchestrator,
        pipeline::{BatchReport, TicketOutcome},
    },
    anyhow::Result,
    clap::Subcommand,
    tracing::warn,
};

use crate::orchestrator;

#[derive(Subcommand)]
pub enum SkillAction {
    /// List installed skills with their state.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Queue a skill from the catalog and install it now.
    Install {
        /// Skill name (e.g. `DateDayTimeYear`).
        name: String,
    },
    /// Uninstall a skill and delete its bundle.
    Remove { name: String },
    /// Activate a skill and persist the choice.
    Enable { name: String },
    /// Deactivate a skill and persist the choice.
    Disable { name: String },
    /// Compare installed versions with the catalog.
    CheckUpdates,
    /// Delete every installed skill and its configuration.
    Wipe {
        /// Do not reinstall the default skills afterwards.
        #[arg(long)]
        no_defaults: bool,
    },
}

pub async fn handle_skills(action: SkillAction) -> Result<()> {
    let orchestrator = orchestrator()?;
    let result = dispatch(&orchestrator, action).await;
    orchestrator.stop().await;
    result
}

async fn dispatch(orchestrator: &LifecycleOrchestrator, action: SkillAction) -> Result<()> {
    let registry = orchestrator.registry();

    match action {
        SkillAction::List { json } => {
            bootstrap(orchestrator).await;
            let skills = registry.list().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&skills)?);
            } else if skills.is_empty() {
                println!("No skills installed.");
            } else {
                for skill in &skills {
                    let mut flags = Vec::new();
                    if skill.required {
                        flags.push("required");
                    }
                    if skill.update_available {
                        flags.push("update available");
                    }
                    println!(
                        "  {:<24} {:<10} {} {}",
                        skill.name,
                        skill.version.to_string(),
                        skill.state,
                        if flags.is_empty() {
                            String::new()
                        } else {
                            format!("[{}]", flags.join(", "))
                        }
                    );
                }
            }
        },
        SkillAction::Install { name } => {
            if !orchestrator.install(&name).await? {
                println!("An install of '{name}' is already queued.");
            }
            print_report(&orchestrator.run_batch().await?);
        },
        SkillAction::Remove { name } => {
            bootstrap(orchestrator).await;
            registry.remove_skill(&name).await?;
            println!("Removed '{name}'.");
        },
        SkillAction::Enable { name } => {
            bootstrap(orchestrator).await;
            registry.activate(&name, true).await?;
            println!("Enabled '{name}'.");
        },
        SkillAction::Disable { name } => {
            bootstrap(orchestrator).await;
            registry.deactivate(&name, true).await?;
            println!("Disabled '{name}'.");
        },
        SkillAction::CheckUpdates => {
            bootstrap(orchestrator).await;
            let found = orchestrator.check_updates().await?;
            println!("{found} update(s) found.");
        },
        SkillAction::Wipe { no_defaults } => {
            bootstrap(orchestrator).await;
            orchestrator.wipe_skills(!no_defaults).await?;
            println!("All skills removed.");
            if !no_defaults {
                print_report(&orchestrator.run_batch().await?);
            }
        },
    }

    Ok(())
}

fn print_report(report: &BatchReport) {
    if report.is_empty() {
        println!("Nothing installed (offline or another install is running).");
    }
    for outcome in &report.outcomes {
        match outcome {
            TicketOutcome::Installed { skill } => println!("Installed '{skill}'."),
            TicketOutcome::Updated { skill } => println!("Updated '{skill}'."),
            TicketOutcome::UpToDate { skill } => println!("'{skill}' is up to date."),
            TicketOutcome::Pending { skill, missing } => println!(
                "'{skill}' waits for {}; they were queued, run the install again.",
                missing.join(", ")
            ),
            TicketOutcome::Failed { skill, reason } => {
                println!("Installing '{skill}' failed: {reason}");
            },
        }
    }
}

/// Load the configured skills. A missing required skill is reported but does
/// not prevent managing the others.
async fn bootstrap(orchestrator: &LifecycleOrchestrator) {
    if let Err(e) = orchestrator.registry().bootstrap().await {
        warn!(error = %e, "skill registry incomplete");
    }
}
