use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adhan_sync::api::{AccountApi, HttpAccountApi};
use adhan_sync::config::Config;
use adhan_sync::entitlement::EntitlementStore;
use adhan_sync::notify::LogNotifier;
use adhan_sync::payments::{ActivationOutcome, PaymentReconciler};
use adhan_sync::storage::{FileStorage, StorageAdapter};

#[derive(Parser, Debug)]
#[command(name = "adhan-sync")]
#[command(about = "Inspect and repair the premium session stored on this device")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the session keys and the cached entitlement
    Status,
    /// Recompute the entitlement from storage
    Refresh,
    /// Log in with the pending registration and activate premium
    CompletePayment,
    /// Look for an active subscription in the cache, the account, then purchase history
    Existing,
    /// Wipe the session and premium caches
    Logout,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adhan_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let storage: Arc<dyn StorageAdapter> = match FileStorage::open(&config.storage_dir) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            eprintln!("Failed to open storage: {}", e);
            std::process::exit(1);
        }
    };
    let api: Arc<dyn AccountApi> = match HttpAccountApi::new(&config.api_base_url, storage.clone()) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            eprintln!("Failed to create API client: {}", e);
            std::process::exit(1);
        }
    };

    let entitlement = Arc::new(
        EntitlementStore::new(storage.clone(), api.clone(), Arc::new(LogNotifier))
            .with_timings(config.timings),
    );

    match cli.command {
        Command::Status => {
            let reconciler = PaymentReconciler::new(storage, api, entitlement.clone());
            let status = reconciler.check_user_sync_status().await;
            let record = entitlement.check_premium_status().await;

            println!("Session");
            println!("  user data:           {}", status.has_user_data);
            println!("  auth token:          {}", status.has_auth_token);
            println!("  refresh token:       {}", status.has_refresh_token);
            println!("  logged in:           {}", status.is_logged_in);
            println!("  explicit connection: {}", status.explicit_connection);
            println!("Entitlement");
            println!("  premium:             {}", record.is_premium);
            println!("  purchased:           {}", record.has_purchased_premium);
            println!("  vip:                 {}", record.is_vip);
            if let Some(plan) = record.subscription_type {
                println!("  plan:                {}", plan);
            }
            if let Some(expiry) = record.expiry_date {
                println!("  expires:             {}", expiry.to_rfc3339());
            }
        }
        Command::Refresh => {
            let record = entitlement.check_premium_status().await;
            println!("premium: {} ({} features)", record.is_premium, record.features.len());
        }
        Command::CompletePayment => {
            let reconciler = PaymentReconciler::new(storage, api, entitlement.clone())
                .with_timings(config.timings);
            match reconciler.complete_payment_activation().await {
                ActivationOutcome::Activated(record) => {
                    println!("Premium activated, expires {:?}", record.expiry_date);
                }
                ActivationOutcome::ManualLoginRequired { message } => {
                    eprintln!("Manual login required: {}", message);
                    std::process::exit(2);
                }
                ActivationOutcome::Failed { message } => {
                    eprintln!("Activation failed: {}", message);
                    std::process::exit(1);
                }
            }
        }
        Command::Existing => {
            let existing = entitlement.check_existing_premium().await;
            if !existing.has_active_premium {
                println!("No active subscription found");
                return;
            }
            println!("Active subscription found via {:?}", existing.source);
            if let Some(plan) = existing.subscription_type {
                println!("  plan:    {}", plan);
            }
            if let Some(expiry) = existing.expiry_date {
                println!("  expires: {}", expiry.to_rfc3339());
            }
            if existing.requires_login {
                println!("  log in to use it on this device");
            }
        }
        Command::Logout => {
            entitlement.force_logout().await;
            println!("Logged out");
        }
    }
}
