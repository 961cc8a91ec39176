// This is the entry point of the mention-meter Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with a pile of mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::mentions::MentionService;
use crate::discord::{Data, Error};
use crate::infra::mentions::SqliteMentionStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

const DEFAULT_DB_PATH: &str = "data/mentions.db";

/// Event handler for non-command Discord events.
/// This is where incoming messages are scanned for mentions.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        // Ignore bot messages (including our own)
        if new_message.author.bot {
            return Ok(());
        }

        // Only guild messages carry a scope to count under (not DMs)
        let Some(guild_id) = new_message.guild_id else {
            return Ok(());
        };

        // The gateway already resolved the mention list; the raw content is
        // parsed as well so mentions the payload misses still count.
        let structured: Vec<u64> = new_message.mentions.iter().map(|u| u.id.get()).collect();

        match data
            .mentions
            .record_message(
                guild_id.get(),
                new_message.channel_id.get(),
                new_message.author.id.get(),
                &new_message.content,
                &structured,
            )
            .await
        {
            Ok(0) => {}
            Ok(credited) => {
                tracing::debug!(
                    guild_id = guild_id.get(),
                    channel_id = new_message.channel_id.get(),
                    author_id = new_message.author.id.get(),
                    credited,
                    "Recorded mentions"
                );
            }
            Err(e) => {
                // Never take the gateway task down over a counting failure
                tracing::error!("Failed to record mentions: {}", e);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Get Discord bot token from environment
    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep the runtime database in a dedicated folder so the repo root stays tidy.
    let db_path =
        std::env::var("MENTION_METER_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Wire the store into the service here, at the composition root.

    let store = SqliteMentionStore::new(&db_path)
        .await
        .expect("Failed to initialize SQLite store");
    let mention_service = Arc::new(MentionService::new(store));

    let data = Data {
        mentions: Arc::clone(&mention_service),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                discord::commands::mentions::mentions(),
                discord::commands::mentions::leaderboard(),
                discord::commands::mentions::resetmentions(),
                discord::commands::mentions::exportmentions(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                // Register slash commands globally (can take a while to propagate).
                // For faster development, use register_in_guild instead.
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!(
                    user = %ready.user.name,
                    user_id = ready.user.id.get(),
                    "Commands registered, bot is ready"
                );

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
