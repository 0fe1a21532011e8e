use super::{Cli, Command};
use anyhow::{Context, Result};
use schemalift::supervisor::interrupt_signal;
use schemalift::{LogEntry, UpgradeConfig, UpgradeOutcome, UpgradeTarget, Upgrader, Version};

pub struct App {
    config: UpgradeConfig,
    upgrader: Upgrader,
}

impl App {
    pub fn open(cli: &Cli) -> Result<Self> {
        let config = UpgradeConfig::load(&cli.config)
            .with_context(|| format!("failed to load configuration '{}'", cli.config.display()))?;
        let upgrader = Upgrader::from_config(&config).context("failed to initialize upgrader")?;
        Ok(Self { config, upgrader })
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Upgrade {
                target,
                downgrade,
                dry_run,
            } => self.upgrade(target, downgrade, dry_run).await,
            Command::Targets {
                tips,
                prefix,
                downgrade,
            } => self.targets(tips, prefix.as_deref(), downgrade).await,
            Command::Status => self.status().await,
            Command::Log { json } => self.log(json).await,
            Command::Setup => {
                self.upgrader
                    .setup_control_tables()
                    .await
                    .context("control table setup failed")?;
                println!("Control tables are up to date");
                Ok(())
            }
        }
    }

    fn target(&self, requested: Option<String>) -> UpgradeTarget {
        requested
            .or_else(|| self.config.target.clone())
            .unwrap_or_default()
            .parse()
            .unwrap_or_default()
    }

    async fn upgrade(&mut self, target: Option<String>, downgrade: bool, dry_run: bool) -> Result<()> {
        let target = self.target(target);
        let allow_downgrade = downgrade || self.config.allow_downgrade;

        if dry_run {
            let plan = self.upgrader.plan(&target, allow_downgrade).await?;
            if plan.is_noop() {
                println!("Nothing to do, database is at {}", render(plan.from.as_ref()));
            }
            for segment in &plan.segments {
                println!("{}", segment);
            }
            return Ok(());
        }

        let outcome = self
            .upgrader
            .upgrade_until(&target, allow_downgrade, interrupt_signal())
            .await
            .with_context(|| format!("upgrade to {} failed", target))?;

        match outcome {
            UpgradeOutcome::NoUpgradeNeeded { version } => {
                println!("No upgrade needed, database is at {}", render(version.as_ref()));
            }
            UpgradeOutcome::Upgraded { from, to, segments } => {
                println!(
                    "Upgraded from {} to {} ({} segments)",
                    render(from.as_ref()),
                    to,
                    segments
                );
            }
        }
        Ok(())
    }

    async fn targets(&mut self, tips: bool, prefix: Option<&str>, downgrade: bool) -> Result<()> {
        let allow_downgrade = downgrade || self.config.allow_downgrade;
        let targets = self
            .upgrader
            .resolve_targets(tips, prefix, allow_downgrade)
            .await?;
        for version in targets {
            println!("{}", render(version.as_ref()));
        }
        Ok(())
    }

    async fn status(&mut self) -> Result<()> {
        let state = self.upgrader.state().await?;
        println!("version:    {}", render(state.version.as_ref()));
        if let Some(target) = &state.target {
            println!("upgrading:  {} ({} statements done)", target, state.statements);
        }
        println!(
            "spec:       {}",
            state.control_spec.as_deref().unwrap_or("<none>")
        );
        Ok(())
    }

    async fn log(&mut self, json: bool) -> Result<()> {
        let entries = self.upgrader.log_entries().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }
        for entry in &entries {
            println!("{}", render_entry(entry));
        }
        Ok(())
    }
}

fn render(version: Option<&Version>) -> &str {
    version.map(String::as_str).unwrap_or("<no version>")
}

fn render_entry(entry: &LogEntry) -> String {
    let result = entry.outcome.to_column().unwrap_or_default();
    format!(
        "{} {} {} -> {} #{} {} {}",
        entry.stamp.to_rfc3339(),
        entry.kind.code(),
        render(entry.source.as_ref()),
        entry.target,
        entry.ordinal,
        entry.command.as_deref().unwrap_or(""),
        result
    )
    .trim_end()
    .to_string()
}
