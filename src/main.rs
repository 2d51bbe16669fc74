use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use conex_sync::core::patch_of;
use conex_sync::features::{LeadStatus, Leads};
use conex_sync::{
    CnpjRegistry, InMemoryStore, RecordId, Row, SyncConfig, SyncDeps, TenantKey, WebhookConfig,
};
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conex-sync")]
#[command(about = "Realtime collection sync for the Conex dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a leads session against an in-memory backend and print its status.
    Demo {
        #[arg(long, default_value = "T1")]
        tenant: String,
        #[arg(long, default_value = "T2")]
        switch_to: String,
    },
    /// Look up a company in the public CNPJ registry.
    Cnpj { cnpj: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo { tenant, switch_to } => run_demo(&tenant, &switch_to).await,
        Command::Cnpj { cnpj } => lookup_cnpj(&cnpj).await,
    }
}

fn lead(uid: &str, tenant: &str, day: u32, name: &str) -> Row {
    let value = json!({
        "uid": uid,
        "created_at": format!("2024-05-{day:02}T09:00:00Z"),
        "led_empresa": tenant,
        "lead_nome": name,
        "status": "Pendente",
    });
    value.as_object().cloned().unwrap_or_default()
}

async fn run_demo(tenant: &str, switch_to: &str) -> Result<()> {
    let Some(first) = TenantKey::parse(tenant) else {
        bail!("tenant must not be blank");
    };
    let store = InMemoryStore::new();
    store.seed(
        "conex_leads",
        vec![
            lead("L1", first.as_str(), 1, "Ana"),
            lead("L2", first.as_str(), 2, "Bruno"),
            lead("L3", switch_to, 3, "Carla"),
        ],
    );

    let config = SyncConfig::from_env().context("reading sync config")?;
    let leads = Leads::start(
        SyncDeps::in_memory(&store).with_config(config),
        Some(first.clone()),
        None,
    )
    .await;
    print_status("started", &leads)?;

    store.insert("conex_leads", lead("L4", first.as_str(), 4, "Diego"));
    wait_for_records(&leads, 3).await;
    print_status("after remote insert", &leads)?;

    leads
        .set_status("L1", LeadStatus::Atendido)
        .await
        .context("confirmed edit")?;
    println!("L1 is now {}", LeadStatus::Atendido);

    store.fail_next_updates(1);
    let failed = leads
        .sync()
        .edit(&RecordId::from("L2"), patch_of("status", "Atendido"))
        .await;
    println!(
        "forced failure on L2: {:?}; L2 status rolled back to {:?}",
        failed.err(),
        leads.sync().get("L2").map(|lead| lead.status)
    );

    leads.sync().set_tenant(TenantKey::parse(switch_to)).await;
    print_status("after tenant switch", &leads)?;

    leads.sync().stop();
    print_status("stopped", &leads)?;
    println!("store traffic: {:?}", store.stats());
    Ok(())
}

async fn wait_for_records(leads: &Leads, expected: usize) {
    let mut changes = leads.sync().changes();
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while leads.sync().status().records < expected {
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
}

fn print_status(label: &str, leads: &Leads) -> Result<()> {
    let status = serde_json::to_string(&leads.sync().status())?;
    println!("[{label}] {status}");
    Ok(())
}

async fn lookup_cnpj(cnpj: &str) -> Result<()> {
    let config = WebhookConfig::from_env().context("reading webhook config")?;
    let registry = CnpjRegistry::new(&config)?;
    let profile = registry
        .lookup(cnpj)
        .await
        .with_context(|| format!("looking up CNPJ {cnpj}"))?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}
