use crate::{cli, tree_builder};
use anyhow::{Context, Result, bail};
use futures::future::try_join_all;
use glob::Pattern;
use mirrorpick::{
    Config, FolderUpdate, IndexStatus, LocalDirectory, MemoryIndex, PickerSession, PollerSet,
    Processing, SelectionState, ViewEntry,
};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Arc,
};
use tracing::{info, warn};

// Layer the config file and CLI overrides over the defaults.
fn load_config(cli_args: &cli::Cli) -> Result<Config> {
    let mut config = match &cli_args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(ms) = cli_args.poll_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = cli_args.suppress_ms {
        config.suppression_window_ms = ms;
    }
    if let Some(ms) = cli_args.grace_ms {
        config.grace_period_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn compile_patterns(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|s| Pattern::new(s).with_context(|| format!("invalid --select glob pattern '{}'", s)))
        .collect()
}

// Every folder and file under the root, listed breadth-first through the session.
async fn discover(session: &PickerSession) -> Result<(Vec<String>, Vec<String>)> {
    let mut folders = Vec::new();
    let mut files = Vec::new();
    let mut level = vec!["/".to_string()];
    while !level.is_empty() {
        let listings = try_join_all(level.iter().map(|f| session.load_folder(f))).await?;
        let mut next = Vec::new();
        for view in listings.iter().flatten() {
            if view.is_dir() {
                next.push(view.path().to_string());
            } else {
                files.push(view.path().to_string());
            }
        }
        folders.append(&mut level);
        level = next;
    }
    files.sort();
    Ok((folders, files))
}

// Select matching files through the cascading selection engine.
async fn preselect(session: &PickerSession, files: &[String], patterns: &[Pattern]) -> Result<usize> {
    let mut matched = 0;
    for path in files {
        let relative = path.trim_start_matches('/');
        if !patterns.iter().any(|p| p.matches_path(Path::new(relative))) {
            continue;
        }
        matched += 1;
        if session.selection_state(path) != SelectionState::FullySelected {
            session.toggle(path).await?;
        }
    }
    Ok(matched)
}

fn checkbox(state: Option<SelectionState>) -> &'static str {
    match state {
        Some(SelectionState::NotSelected) => "[ ] ",
        Some(SelectionState::PartiallySelected) => "[-] ",
        Some(SelectionState::FullySelected) => "[x] ",
        None => "",
    }
}

async fn print_tree(session: &PickerSession, expanded: &HashSet<String>) {
    let entries = session.visible_tree(expanded).await;
    let rows: Vec<tree_builder::Row<'_>> = entries
        .iter()
        .map(|entry| match entry {
            ViewEntry::Row { depth, view } => (*depth, view.node.node.name(), view.is_dir()),
            ViewEntry::Failed { depth, .. } => (*depth, "(failed to load)", false),
        })
        .collect();
    let labels = tree_builder::build_tree_labels(&rows);

    println!("./");
    for (entry, label) in entries.iter().zip(labels) {
        match entry {
            ViewEntry::Row { view, .. } => {
                println!("{}{}  {}", checkbox(view.selection), label, view.effective)
            }
            ViewEntry::Failed { folder, error, .. } => {
                println!("{}  {}: {}", label, folder, error)
            }
        }
    }
}

// Poll every folder until nothing is in flight, printing status transitions.
async fn follow_rebuild(session: &Arc<PickerSession>, folders: &[String]) -> Result<()> {
    let mut last_seen: HashMap<String, IndexStatus> = HashMap::new();
    let (pollers, mut updates) = PollerSet::new(Arc::clone(session));
    let mut waiting: HashSet<String> = HashSet::new();
    for folder in folders {
        if pollers.watch(folder) {
            waiting.insert(folder.clone());
        }
    }

    let deadline = session.config().grace_period() * 2 + session.config().poll_interval() * 4;
    let drained = tokio::time::timeout(deadline, async {
        while !waiting.is_empty() {
            let Some(update) = updates.recv().await else {
                break;
            };
            match update {
                FolderUpdate::Loaded { views, .. } => {
                    for view in views.iter().filter(|v| !v.is_dir()) {
                        let previous = last_seen.insert(view.path().to_string(), view.effective);
                        if previous != Some(view.effective) {
                            let from = previous.map_or("-".to_string(), |s| s.to_string());
                            println!("  {}: {} → {}", view.path(), from, view.effective);
                        }
                    }
                }
                FolderUpdate::Failed { folder, error } => {
                    eprintln!("⚠️ Warning: refreshing {} failed: {}", folder, error);
                }
                FolderUpdate::Settled { folder } => {
                    waiting.remove(&folder);
                }
            }
        }
    })
    .await;

    pollers.unwatch_all();
    if drained.is_err() {
        bail!("index did not settle within {:?}", deadline);
    }
    Ok(())
}

// Main orchestrator for the mirrorpick application logic.
pub async fn run_mirrorpick(cli_args: cli::Cli) -> Result<()> {
    // Step 1: Configuration and collaborators.
    let config = load_config(&cli_args)?;
    let patterns = compile_patterns(&cli_args.select)?;
    let scan_root = cli_args
        .root
        .canonicalize()
        .with_context(|| format!("cannot open {}", cli_args.root.display()))?;
    if !scan_root.is_dir() {
        bail!("{} is not a directory", scan_root.display());
    }

    let directory = Arc::new(
        LocalDirectory::new(&scan_root)
            .with_types(cli_args.types.clone())
            .include_ignored(cli_args.include_ignored)
            .with_page_size(config.page_size),
    );
    let processing = if cli_args.instant {
        Processing::Instant
    } else {
        Processing::Stepped
    };
    let index = Arc::new(
        MemoryIndex::new(directory.resolver())
            .with_processing(processing)
            .with_page_size(config.page_size),
    );
    let index_id = index.create_index::<&str>(&[])?;
    let session = Arc::new(PickerSession::new(directory, index, index_id, config));
    info!("scanning {}", scan_root.display());

    // Step 2: Discover the tree and apply --select.
    let (folders, files) = discover(&session).await?;
    if files.is_empty() {
        println!("No files found under {}.", scan_root.display());
        return Ok(());
    }
    let expanded: HashSet<String> = folders.iter().cloned().collect();

    session.enter_edit_mode(None);
    let matched = preselect(&session, &files, &patterns).await?;
    if matched == 0 {
        println!("No files matched the --select patterns.");
        print_tree(&session, &expanded).await;
        return Ok(());
    }
    print_tree(&session, &expanded).await;
    println!("Selected paths: {}", session.selected_paths().join(", "));

    // Step 3: Expand only, or rebuild and follow the index until it settles.
    if cli_args.expand_only {
        let resolved = session.expander().expand(&session.selected_paths()).await?;
        for file in &resolved {
            println!("{}\t{}", file.id, file.path);
        }
        println!("({} files)", resolved.len());
        return Ok(());
    }

    let new_id = session.save().await?;
    println!("✅ Rebuild submitted as {} ({} files matched).", new_id, matched);
    follow_rebuild(&session, &folders).await?;

    if !session.pending_paths().is_empty() {
        warn!("pending paths left after polling: {:?}", session.pending_paths());
    }
    print_tree(&session, &expanded).await;
    Ok(())
}
