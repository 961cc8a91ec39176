// Discord commands for the mention tracker.
//
// This layer stays thin: extract primitive ids from Discord types, call the
// core service, format the reply.

use crate::core::mentions::{DEFAULT_LEADERBOARD_LIMIT, MAX_LEADERBOARD_LIMIT, MentionService};
use crate::infra::mentions::SqliteMentionStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Data that's shared across all commands.
pub struct Data {
    pub mentions: Arc<MentionService<SqliteMentionStore>>,
}

/// How many times has a user been @-mentioned?
#[poise::command(slash_command, guild_only)]
pub async fn mentions(
    ctx: Context<'_>,
    #[description = "The person you care about"] user: serenity::User,
    #[description = "Limit to a specific channel (optional)"] channel: Option<serenity::Channel>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let channel_id = channel.as_ref().map(|ch| ch.id().get());

    let tally = ctx
        .data()
        .mentions
        .user_tally(guild_id, channel_id, user.id.get())
        .await?;

    let scope = match channel_id {
        Some(id) => format!("in <#{}>", id),
        None => "server-wide".to_string(),
    };

    let mut embed = serenity::CreateEmbed::new()
        .title(format!("Mentions for {}", user.name))
        .color(serenity::Color::BLURPLE)
        .thumbnail(user.face())
        .field("Mentioned", format!("**{}** times {}", tally.received, scope), false)
        .field("Mentions given", format!("**{}**", tally.given), false);

    if let Some(at) = tally.last_mentioned_at {
        embed = embed.field(
            "Last mentioned",
            format!("<t:{}:R>", at.timestamp()),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;

    Ok(())
}

/// Top mention magnets of the server.
#[poise::command(slash_command, guild_only)]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "Limit to a specific channel"] channel: Option<serenity::Channel>,
    #[description = "How many users to display (default 10)"]
    #[min = 1]
    #[max = 50]
    limit: Option<usize>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let channel_id = channel.as_ref().map(|ch| ch.id().get());

    let entries = ctx
        .data()
        .mentions
        .leaderboard(guild_id, channel_id, limit)
        .await?;

    if entries.is_empty() {
        ctx.say("No data yet. Mention someone first! 📣").await?;
        return Ok(());
    }

    let mut description = match channel_id {
        Some(id) => format!("Scope: <#{}>\n\n", id),
        None => "Scope: server-wide\n\n".to_string(),
    };
    for (index, entry) in entries.iter().enumerate() {
        let rank = index + 1;
        let medal = match rank {
            1 => "🥇",
            2 => "🥈",
            3 => "🥉",
            _ => "  ",
        };
        let name = resolve_display_name_cached(&ctx, guild_id, entry.user_id);
        description.push_str(&format!(
            "{} **#{:02}** {} – **{}** mentions\n",
            medal, rank, name, entry.received
        ));
    }

    let embed = serenity::CreateEmbed::new()
        .title("📣 Mention leaderboard")
        .description(description)
        .color(serenity::Color::BLURPLE)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Top {} of at most {}",
            entries.len(),
            limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT).min(MAX_LEADERBOARD_LIMIT)
        )));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// Wipe every mention counter for this server.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn resetmentions(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let removed = ctx.data().mentions.reset_guild(guild_id).await?;
    tracing::info!(guild_id, removed, "Mention counters reset");

    ctx.say(format!(
        "🗑️ Mention counters reset. {} records removed.",
        removed
    ))
    .await?;

    Ok(())
}

/// Export this server's mention tallies as JSON.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn exportmentions(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let entries = ctx.data().mentions.export_guild(guild_id).await?;
    if entries.is_empty() {
        ctx.say("No data yet. Nothing to export.").await?;
        return Ok(());
    }

    let json = serde_json::to_string_pretty(&entries)?;
    let attachment = serenity::CreateAttachment::bytes(json.into_bytes(), "mentions.json");

    ctx.send(
        poise::CreateReply::default()
            .content(format!("Mention tallies for {} users.", entries.len()))
            .attachment(attachment)
            .ephemeral(true),
    )
    .await?;

    Ok(())
}

/// Resolve a human-friendly display name for a user, cache only.
///
/// Falls back to the mention format so the entry is still identifiable.
/// No HTTP calls here; a leaderboard with fifty rows cannot afford them.
fn resolve_display_name_cached(ctx: &Context<'_>, guild_id: u64, user_id: u64) -> String {
    let guild_id_s = serenity::GuildId::from(guild_id);
    let user_id_s = serenity::UserId::from(user_id);

    if let Some(guild) = ctx.serenity_context().cache.guild(guild_id_s) {
        if let Some(member) = guild.members.get(&user_id_s) {
            // display_name() prefers nick over username
            return member.display_name().to_string();
        }
    }

    if let Some(user) = ctx.serenity_context().cache.user(user_id_s) {
        return user.name.clone();
    }

    format!("<@{}>", user_id)
}
