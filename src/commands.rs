//! Command parsing and handlers (the dispatcher boundary).
//!
//! Messages from the owner are parsed into [`Command`]s, previous bot
//! output is cleared for qualifying commands, and each command runs as one
//! operation under a wall-clock budget. An operation that exceeds the
//! budget has its future dropped — workspace cleanup runs via `Drop` — and
//! the conversation still gets a terminal message.

use crate::BotDeps;
use crate::chat::{ConversationId, MessageId, OutgoingAudio};
use crate::history::HistoryRecord;
use crate::music::{
    Collection, Entity, EntityKind, SearchHit, SearchKind, classify_entity_id, extract_entity_id,
};
use crate::progress::{ProgressBoard, ProgressHandle};
use crate::retry::{self, RetryError};
use chrono::Utc;
use futures::StreamExt as _;
use std::sync::Arc;

/// Commands that trigger an automatic clear of previous bot output.
const AUTO_CLEAR_COMMANDS: &[&str] = &["help", "search", "see", "dl", "download", "last", "clear"];

/// One user-invoked command instance. Created per message, owned by the
/// task executing it, never persisted. Cancellation is budget-based: the
/// dispatcher drops the operation's future when the timeout elapses.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: uuid::Uuid,
    pub conversation: ConversationId,
    pub invoking_message: MessageId,
    pub started_at: chrono::DateTime<Utc>,
}

/// One parsed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Clear,
    Last,
    Search { kind: SearchKind, query: String },
    See { target: String },
    Download { target: DownloadTarget },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadTarget {
    /// Direct track link.
    Track { url: String },
    /// Search, then download the first match.
    Query { query: String },
    /// Album or playlist link; every track runs through the pipeline.
    Collection { url: String },
}

#[derive(Debug, PartialEq)]
pub enum CommandError {
    Unknown,
    Usage(String),
}

/// Split `text` into a lowercase command name and its arguments when it
/// starts with the configured prefix.
pub fn split_command(prefix: &str, text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.trim().strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_lowercase();
    Some((name, parts.map(str::to_string).collect()))
}

fn search_usage(prefix: &str) -> String {
    format!(
        "**Usage:** `{prefix}search <flag> <query>`\n\
         Flags: `-t` songs, `-v` videos, `-a` albums, `-p` playlists, `-e` artists."
    )
}

fn download_usage(prefix: &str) -> String {
    format!(
        "**Usage:** `{prefix}dl <flag> <argument>`\n\
         Flags:\n\
         `-t <track link>` — download one track\n\
         `-a <album/playlist link>` — download a collection\n\
         `-s <search query>` — find and download the first match"
    )
}

impl Command {
    pub fn build(name: &str, args: &[String], prefix: &str) -> Result<Command, CommandError> {
        match name {
            "help" => Ok(Command::Help),
            "clear" => Ok(Command::Clear),
            "last" => Ok(Command::Last),
            "search" => {
                let (flag, rest) = args
                    .split_first()
                    .ok_or_else(|| CommandError::Usage(search_usage(prefix)))?;
                let kind = match flag.as_str() {
                    "-t" => SearchKind::Songs,
                    "-v" => SearchKind::Videos,
                    "-a" => SearchKind::Albums,
                    "-p" => SearchKind::Playlists,
                    "-e" => SearchKind::Artists,
                    _ => return Err(CommandError::Usage(search_usage(prefix))),
                };
                let query = rest.join(" ");
                if query.is_empty() {
                    return Err(CommandError::Usage(search_usage(prefix)));
                }
                Ok(Command::Search { kind, query })
            }
            "see" => {
                if args.is_empty() {
                    return Err(CommandError::Usage(format!(
                        "**Usage:** `{prefix}see <link or id>`"
                    )));
                }
                Ok(Command::See {
                    target: args.join(" "),
                })
            }
            "dl" | "download" => {
                let (flag, rest) = args
                    .split_first()
                    .ok_or_else(|| CommandError::Usage(download_usage(prefix)))?;
                let value = rest.join(" ");
                if value.is_empty() {
                    return Err(CommandError::Usage(download_usage(prefix)));
                }
                match flag.as_str() {
                    "-t" | "-a" if !value.starts_with("http") => {
                        Err(CommandError::Usage(format!(
                            "⚠️ `{flag}` expects an http(s) link.\n{}",
                            download_usage(prefix)
                        )))
                    }
                    "-t" => Ok(Command::Download {
                        target: DownloadTarget::Track { url: value },
                    }),
                    "-a" => Ok(Command::Download {
                        target: DownloadTarget::Collection { url: value },
                    }),
                    "-s" => Ok(Command::Download {
                        target: DownloadTarget::Query { query: value },
                    }),
                    _ => Err(CommandError::Usage(download_usage(prefix))),
                }
            }
            _ => Err(CommandError::Unknown),
        }
    }
}

/// Route one inbound chat message. Called by the platform adapter.
pub async fn handle_message(
    deps: Arc<BotDeps>,
    conversation: ConversationId,
    invoking_message: MessageId,
    sender: u64,
    text: &str,
) {
    let config = deps.config.clone();
    if !config.bot.enabled {
        return;
    }
    let Some((name, args)) = split_command(&config.bot.prefix, text) else {
        return;
    };
    if Some(sender) != config.telegram.owner_id {
        tracing::warn!(sender, %conversation, command = %name, "ignoring command from unauthorized sender");
        return;
    }
    tracing::info!(%conversation, command = %name, ?args, "command received");

    // The invoking message is removed so the conversation only carries
    // output the registry can clear.
    if let Err(error) = deps
        .chat
        .delete_messages(conversation, &[invoking_message])
        .await
    {
        tracing::debug!(%error, "could not delete invoking message");
    }

    if config.bot.auto_clear && AUTO_CLEAR_COMMANDS.contains(&name.as_str()) {
        deps.registry.clear(conversation).await;
    }

    let command = match Command::build(&name, &args, &config.bot.prefix) {
        Ok(command) => command,
        Err(CommandError::Unknown) => {
            reply_tracked(
                &deps,
                conversation,
                &format!(
                    "⚠️ Unknown command `{name}`. Try `{}help`.",
                    config.bot.prefix
                ),
            )
            .await;
            return;
        }
        Err(CommandError::Usage(usage)) => {
            reply_tracked(&deps, conversation, &usage).await;
            return;
        }
    };

    let operation = Operation {
        id: uuid::Uuid::new_v4(),
        conversation,
        invoking_message,
        started_at: Utc::now(),
    };

    let outcome = tokio::time::timeout(
        config.operation_timeout(),
        run_command(&deps, &operation, command),
    )
    .await;
    if outcome.is_err() {
        tracing::warn!(%conversation, operation = %operation.id, "operation exceeded its time budget; results discarded");
        reply_tracked(
            &deps,
            conversation,
            "⏰ The operation timed out and was cancelled.",
        )
        .await;
    }
}

async fn run_command(deps: &Arc<BotDeps>, operation: &Operation, command: Command) {
    let conversation = operation.conversation;
    match command {
        Command::Help => {
            reply_tracked(deps, conversation, &help_text(&deps.config.bot.prefix)).await;
        }
        Command::Clear => {
            deps.registry.clear(conversation).await;
            reply_tracked(deps, conversation, "✅ Previous bot messages cleared.").await;
        }
        Command::Last => handle_last(deps, conversation).await,
        Command::Search { kind, query } => handle_search(deps, conversation, kind, query).await,
        Command::See { target } => handle_see(deps, conversation, target).await,
        Command::Download { target } => handle_download(deps, conversation, target).await,
    }
}

fn help_text(prefix: &str) -> String {
    format!(
        "**Tunegrab commands**\n\
         `{prefix}search -t|-v|-a|-p|-e <query>` — search songs, videos, albums, playlists, artists\n\
         `{prefix}see <link or id>` — inspect a track, album, playlist, or artist\n\
         `{prefix}dl -t <link>` — download a track\n\
         `{prefix}dl -s <query>` — find and download the first match\n\
         `{prefix}dl -a <link>` — download an album or playlist\n\
         `{prefix}last` — recent downloads\n\
         `{prefix}clear` — delete this bot's previous messages\n\
         `{prefix}help` — this message"
    )
}

/// Send a tracked reply under the retry policy.
async fn reply_tracked(deps: &Arc<BotDeps>, conversation: ConversationId, text: &str) {
    match retry::call(&deps.retry_policy(), None, || {
        deps.chat.send_text(conversation, text)
    })
    .await
    {
        Ok(message) => deps.registry.record(conversation, message).await,
        Err(error) => tracing::error!(%conversation, %error, "failed to deliver reply"),
    }
}

/// Human-readable detail for a failed wrapped call.
fn describe_failure<E: std::error::Error + 'static>(error: &RetryError<E>) -> String {
    match error {
        RetryError::Exhausted { attempts, source } => {
            format!("the service kept failing ({attempts} attempts): {source}")
        }
        RetryError::AuthenticationFailed { .. } => {
            "authentication was lost and could not be recovered".to_string()
        }
        RetryError::Fatal(source) => source.to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

async fn handle_search(
    deps: &Arc<BotDeps>,
    conversation: ConversationId,
    kind: SearchKind,
    query: String,
) {
    let mut progress = deps
        .reporter
        .begin(
            conversation,
            &format!(
                "🔍 Searching {} for '{}'…",
                kind.label(),
                truncate(&query, 40)
            ),
        )
        .await;

    let limit = deps.config.bot.search_limit;
    let recovery: &dyn retry::Recovery = deps.session.as_ref();
    let result = retry::call(&deps.retry_policy(), Some(recovery), || {
        // Re-fetched per attempt: the session may have been swapped by a
        // recovery in between.
        let client = deps.session.client();
        let query = query.clone();
        async move { client.search(&query, kind, limit).await }
    })
    .await;

    match result {
        Ok(hits) if hits.is_empty() => {
            progress
                .finish(&format!("ℹ️ Nothing found for '{}'.", truncate(&query, 60)))
                .await;
        }
        Ok(hits) => {
            let shown = hits.len().min(deps.config.bot.search_display_limit);
            progress
                .finish(&format!(
                    "✅ {} {} result(s) for '{}'.",
                    hits.len(),
                    kind.label(),
                    truncate(&query, 40)
                ))
                .await;
            reply_tracked(deps, conversation, &render_hits(&hits[..shown])).await;
        }
        Err(error) => {
            progress
                .finish(&format!("❌ Search failed: {}", describe_failure(&error)))
                .await;
        }
    }
}

fn render_hits(hits: &[SearchHit]) -> String {
    let mut blocks = Vec::with_capacity(hits.len());
    for (index, hit) in hits.iter().enumerate() {
        let mut line = format!("{}. {} — {}", index + 1, hit.title, hit.artist_line());
        if let Some(duration) = &hit.duration {
            line.push_str(&format!(" ({duration})"));
        }
        line.push('\n');
        line.push_str(&hit.url());
        blocks.push(line);
    }
    blocks.join("\n\n")
}

async fn handle_see(deps: &Arc<BotDeps>, conversation: ConversationId, target: String) {
    let Some(id) = extract_entity_id(&target) else {
        reply_tracked(
            deps,
            conversation,
            &format!("⚠️ Could not extract an id from `{}`.", truncate(&target, 60)),
        )
        .await;
        return;
    };
    let kind = classify_entity_id(&id);

    let mut progress = deps
        .reporter
        .begin(conversation, &format!("🔍 Fetching {}…", kind.label()))
        .await;

    let recovery: &dyn retry::Recovery = deps.session.as_ref();
    let result = retry::call(&deps.retry_policy(), Some(recovery), || {
        let client = deps.session.client();
        let id = id.clone();
        async move { client.entity(kind, &id).await }
    })
    .await;

    match result {
        Ok(entity) => {
            progress.finish(&format!("✅ Found {}.", kind.label())).await;
            reply_tracked(deps, conversation, &render_entity(&entity)).await;
        }
        Err(error) => {
            progress
                .finish(&format!("❌ Lookup failed: {}", describe_failure(&error)))
                .await;
        }
    }
}

fn render_entity(entity: &Entity) -> String {
    match entity {
        Entity::Song(track) => {
            let mut text = format!("🎵 **{}** — {}", track.title, track.artist_line());
            if let Some(duration) = track.duration_secs {
                text.push_str(&format!(" ({})", format_duration(i64::from(duration))));
            }
            text.push('\n');
            text.push_str(&track.url());
            text
        }
        Entity::Album(collection) => render_collection("💿 Album", collection),
        Entity::Playlist(collection) => render_collection("📜 Playlist", collection),
        Entity::Artist {
            name, description, ..
        } => {
            let mut text = format!("🎤 **{name}**");
            if let Some(description) = description {
                text.push('\n');
                text.push_str(&truncate(description, 400));
            }
            text
        }
    }
}

fn render_collection(label: &str, collection: &Collection) -> String {
    let mut text = format!("{label}: **{}**", collection.title);
    if !collection.artists.is_empty() {
        text.push_str(&format!(" — {}", collection.artists.join(", ")));
    }
    if let Some(year) = &collection.year {
        text.push_str(&format!(" ({year})"));
    }
    text.push_str(&format!("\n{} tracks:", collection.tracks.len()));
    for (index, track) in collection.tracks.iter().take(10).enumerate() {
        text.push_str(&format!("\n{}. {}", index + 1, track.title));
    }
    if collection.tracks.len() > 10 {
        text.push_str(&format!("\n… and {} more", collection.tracks.len() - 10));
    }
    text
}

fn format_duration(total_secs: i64) -> String {
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

async fn handle_last(deps: &Arc<BotDeps>, conversation: ConversationId) {
    let mut lines = Vec::new();
    let mut stream = deps.history.load();
    while let Some(item) = stream.next().await {
        match item {
            Ok(record) => {
                let mut line = format!(
                    "{}. {} — {}",
                    lines.len() + 1,
                    record.title,
                    record.artist
                );
                if let Some(duration) = record.duration_secs {
                    line.push_str(&format!(" ({})", format_duration(duration)));
                }
                line.push_str(&format!(
                    " · {}",
                    record.downloaded_at.format("%Y-%m-%d %H:%M")
                ));
                line.push('\n');
                line.push_str(&record.source_url);
                lines.push(line);
            }
            Err(error) => tracing::error!(%error, "failed to load history record"),
        }
    }
    drop(stream);

    if lines.is_empty() {
        reply_tracked(
            deps,
            conversation,
            "ℹ️ No recent downloads (or history is disabled).",
        )
        .await;
    } else {
        reply_tracked(
            deps,
            conversation,
            &format!("**Recent downloads**\n\n{}", lines.join("\n\n")),
        )
        .await;
    }
}

async fn handle_download(deps: &Arc<BotDeps>, conversation: ConversationId, target: DownloadTarget) {
    match target {
        DownloadTarget::Track { url } => {
            let Some(video_id) = extract_entity_id(&url) else {
                reply_tracked(
                    deps,
                    conversation,
                    &format!("⚠️ Could not extract a track id from `{}`.", truncate(&url, 60)),
                )
                .await;
                return;
            };
            let mut board = ProgressBoard::new();
            board.set("Download", "⏳ waiting…");
            board.set("Send", "⏸️");
            let mut progress = deps.reporter.begin(conversation, &board.render()).await;
            deliver_track(deps, conversation, &mut progress, &mut board, &url, &video_id).await;
            progress.finish(&board.render()).await;
        }
        DownloadTarget::Query { query } => {
            let mut board = ProgressBoard::new();
            board.set("Search", format!("⏳ '{}'", truncate(&query, 30)));
            board.set("Download", "⏸️");
            board.set("Send", "⏸️");
            let mut progress = deps.reporter.begin(conversation, &board.render()).await;

            match find_first_hit(deps, &query).await {
                Ok(Some(hit)) => {
                    board.set("Search", format!("✅ {}", truncate(&hit.title, 30)));
                    progress.update(&board.render()).await;
                    deliver_track(deps, conversation, &mut progress, &mut board, &hit.url(), &hit.id)
                        .await;
                }
                Ok(None) => {
                    board.set("Search", format!("❌ nothing found for '{}'", truncate(&query, 30)));
                    board.set("Download", "❌");
                    board.set("Send", "❌");
                }
                Err(detail) => {
                    board.set("Search", format!("❌ {detail}"));
                    board.set("Download", "❌");
                    board.set("Send", "❌");
                }
            }
            progress.finish(&board.render()).await;
        }
        DownloadTarget::Collection { url } => {
            handle_collection_download(deps, conversation, url).await;
        }
    }
}

/// Songs first, videos as fallback — the first hit wins.
async fn find_first_hit(deps: &Arc<BotDeps>, query: &str) -> Result<Option<SearchHit>, String> {
    for kind in [SearchKind::Songs, SearchKind::Videos] {
        let recovery: &dyn retry::Recovery = deps.session.as_ref();
        let result = retry::call(&deps.retry_policy(), Some(recovery), || {
            let client = deps.session.client();
            let query = query.to_string();
            async move { client.search(&query, kind, 1).await }
        })
        .await;
        match result {
            Ok(hits) => {
                if let Some(hit) = hits.into_iter().next() {
                    return Ok(Some(hit));
                }
            }
            Err(error) => return Err(describe_failure(&error)),
        }
    }
    Ok(None)
}

/// Download one track through the pipeline and send it. Returns whether the
/// file reached the conversation.
async fn deliver_track(
    deps: &Arc<BotDeps>,
    conversation: ConversationId,
    progress: &mut ProgressHandle,
    board: &mut ProgressBoard,
    url: &str,
    video_id: &str,
) -> bool {
    board.set("Download", "🔄 downloading…");
    progress.update(&board.render()).await;

    let result = match deps.pipeline.download(url, video_id).await {
        Ok(result) => result,
        Err(error) => {
            tracing::error!(%error, url, "download pipeline failed");
            board.set("Download", format!("❌ {}", truncate(&error.to_string(), 80)));
            board.set("Send", "❌");
            return false;
        }
    };

    board.set("Download", format!("✅ {}", truncate(&result.title, 30)));
    board.set("Send", "🔄 uploading…");
    progress.update(&board.render()).await;

    let audio = OutgoingAudio {
        path: result.path.clone(),
        title: result.title.clone(),
        performer: result.artist.clone(),
        duration_secs: result.duration_secs,
        cover: result.cover.clone(),
        caption: None,
    };
    match retry::call(&deps.retry_policy(), None, || {
        deps.chat.send_audio(conversation, &audio)
    })
    .await
    {
        Ok(message) => {
            deps.registry.record(conversation, message).await;
            board.set("Send", "✅ done");
            if !result.warnings.is_empty() {
                board.set("Tags", format!("⚠️ {}", result.warnings.join(", ")));
            }
            let record = HistoryRecord {
                title: result.title.clone(),
                artist: result.artist.clone(),
                album: result.album.clone(),
                source_url: result.source_url.clone(),
                video_id: result.video_id.clone(),
                duration_secs: result.duration_secs.map(i64::from),
                downloaded_at: Utc::now(),
            };
            if let Err(error) = deps.history.append(&record).await {
                tracing::error!(%error, "failed to append history record");
            }
            true
        }
        Err(error) => {
            tracing::error!(%error, "failed to send audio");
            board.set(
                "Send",
                format!("❌ {}", truncate(&describe_failure(&error), 60)),
            );
            false
        }
    }
}

async fn handle_collection_download(
    deps: &Arc<BotDeps>,
    conversation: ConversationId,
    url: String,
) {
    let Some(id) = extract_entity_id(&url) else {
        reply_tracked(
            deps,
            conversation,
            &format!("⚠️ Could not extract an id from `{}`.", truncate(&url, 60)),
        )
        .await;
        return;
    };
    let kind = match classify_entity_id(&id) {
        EntityKind::Album => EntityKind::Album,
        EntityKind::Song => {
            reply_tracked(
                deps,
                conversation,
                "⚠️ That link points at a single track; use `-t` instead.",
            )
            .await;
            return;
        }
        _ => EntityKind::Playlist,
    };

    let mut board = ProgressBoard::new();
    board.set("Collection", "🔄 analyzing…");
    board.set("Progress", "⏸️");
    let mut progress = deps.reporter.begin(conversation, &board.render()).await;

    let recovery: &dyn retry::Recovery = deps.session.as_ref();
    let entity = retry::call(&deps.retry_policy(), Some(recovery), || {
        let client = deps.session.client();
        let id = id.clone();
        async move { client.entity(kind, &id).await }
    })
    .await;

    let collection = match entity {
        Ok(Entity::Album(collection)) | Ok(Entity::Playlist(collection)) => collection,
        Ok(_) => {
            board.set("Collection", "❌ not a downloadable collection");
            progress.finish(&board.render()).await;
            return;
        }
        Err(error) => {
            board.set("Collection", format!("❌ {}", describe_failure(&error)));
            progress.finish(&board.render()).await;
            return;
        }
    };

    let total = collection.tracks.len();
    board.set(
        "Collection",
        format!("'{}' ({} tracks)", truncate(&collection.title, 40), total),
    );

    let mut sent = 0usize;
    for (index, track) in collection.tracks.iter().enumerate() {
        board.set(
            "Progress",
            format!("🔄 {}/{} {}", index + 1, total, truncate(&track.title, 30)),
        );
        progress.update(&board.render()).await;
        // Per-track failures are tolerated; the summary reports the tally.
        if deliver_track(
            deps,
            conversation,
            &mut progress,
            &mut board,
            &track.url(),
            &track.video_id,
        )
        .await
        {
            sent += 1;
        }
    }

    board.set("Progress", format!("✅ {sent}/{total} tracks delivered"));
    progress.finish(&board.render()).await;
}
