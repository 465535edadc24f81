use antigravity::{Orchestrator, OrchestratorConfig, Producer, Task};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AthleteProfile {
    fis_code: String,
    name: String,
    world_cup_points: u32,
}

// Stands in for a slow remote profile page
struct ProfileLookup {
    fis_code: String,
    requests: Arc<AtomicUsize>,
}

#[async_trait]
impl Producer<AthleteProfile> for ProfileLookup {
    async fn produce(&self) -> anyhow::Result<AthleteProfile> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let latency = Duration::from_millis(50 + fastrand::u64(0..150));
        tokio::time::sleep(latency).await;

        if self.fis_code.is_empty() {
            anyhow::bail!("missing FIS code");
        }

        Ok(AthleteProfile {
            name: format!("Athlete {}", self.fis_code),
            world_cup_points: fastrand::u32(0..2000),
            fis_code: self.fis_code.clone(),
        })
    }
}

fn lookup_tasks(codes: &[&str], requests: &Arc<AtomicUsize>) -> anyhow::Result<Vec<Task<AthleteProfile>>> {
    codes
        .iter()
        .map(|code| {
            let lookup = ProfileLookup {
                fis_code: code.to_string(),
                requests: requests.clone(),
            };
            Ok(Task::keyed("athlete_profile", &[code], lookup)?)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => OrchestratorConfig::from_yaml_file(path)?,
        None => OrchestratorConfig::builder().max_concurrent(3).build()?,
    };
    let orchestrator: Orchestrator<AthleteProfile> = Orchestrator::new(config)?;
    let requests = Arc::new(AtomicUsize::new(0));

    let first_round = ["9530001", "9530002", "9530003", "9530004", "9530005"];
    let profiles = orchestrator.run(lookup_tasks(&first_round, &requests)?).await?;
    for profile in &profiles {
        println!("{} ({}): {} pts", profile.name, profile.fis_code, profile.world_cup_points);
    }

    // Overlaps the first round; only the new codes hit the remote side
    let second_round = ["9530004", "9530005", "9530006", "9530001"];
    orchestrator.run(lookup_tasks(&second_round, &requests)?).await?;

    let outcomes = orchestrator
        .run_settled(lookup_tasks(&["9530002", ""], &requests)?)
        .await;
    for outcome in &outcomes {
        if let Err(e) = outcome {
            println!("Lookup failed: {}", e);
        }
    }

    println!("Remote requests: {}", requests.load(Ordering::SeqCst));
    println!("{}", serde_json::to_string_pretty(&orchestrator.get_stats())?);
    for entry in orchestrator.cached_entries().iter().take(3) {
        println!("{} cached at {}", entry.key, entry.stored_at.to_rfc3339());
    }

    Ok(())
}
