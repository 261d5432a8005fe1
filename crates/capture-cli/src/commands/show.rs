use capture_core::revision::RevisionTree;
use serde::Serialize;

use crate::commands::common::{
    format_sync_timestamp, record_to_list_item, resolve_record, GlobalArgs, RecordListItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct LeafItem {
    pub rev: String,
    pub winner: bool,
    pub deleted: bool,
    pub superseded: bool,
    pub client_rev_by: String,
    pub client_rev_at: i64,
    pub server_rev_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecordDetail {
    #[serde(flatten)]
    pub record: RecordListItem,
    pub leaves: Vec<LeafItem>,
    pub revision_count: usize,
    pub purged_count: usize,
}

pub fn leaf_items(tree: &RevisionTree) -> Vec<LeafItem> {
    let winner = tree.current_winner().map(|winner| winner.rev.clone());
    tree.leaves()
        .into_iter()
        .map(|leaf| LeafItem {
            rev: leaf.rev.to_string(),
            winner: winner.as_ref() == Some(&leaf.rev),
            deleted: leaf.deleted,
            superseded: tree.is_superseded(&leaf.rev),
            client_rev_by: leaf.client_rev_by.clone(),
            client_rev_at: leaf.client_rev_at,
            server_rev_at: leaf.server_rev_at,
        })
        .collect()
}

pub async fn run_show(id: &str, as_json: bool, global: &GlobalArgs) -> Result<(), CliError> {
    let engine = global.open_engine().await?;
    let record = resolve_record(&engine, id).await?;
    let tree = engine
        .tree(&record.id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(record.id.to_string()))?;

    let detail = RecordDetail {
        record: record_to_list_item(&record),
        leaves: leaf_items(&tree),
        revision_count: tree.len(),
        purged_count: tree.purged().count(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("id:       {}", record.id);
    println!("table:    {}", record.table);
    println!("rev:      {}", record.rev);
    println!("deleted:  {}", record.deleted);
    println!(
        "edited:   {} by {}",
        format_sync_timestamp(record.client_rev_at),
        record.client_rev_by
    );
    match record.server_rev_at {
        Some(at) => println!("synced:   server_rev_at={at}"),
        None => println!("synced:   no"),
    }
    println!(
        "history:  {} revision(s), {} purged",
        detail.revision_count, detail.purged_count
    );
    println!("payload:  {}", serde_json::to_string_pretty(&record.payload)?);
    println!("leaves:");
    for leaf in &detail.leaves {
        let marker = if leaf.winner { "*" } else { " " };
        let state = match (leaf.superseded, leaf.deleted) {
            (true, _) => "settled",
            (false, true) => "deleted",
            (false, false) => "live",
        };
        let synced = leaf
            .server_rev_at
            .map_or_else(|| "unsynced".to_string(), |at| format!("server_rev_at={at}"));
        println!(
            "  {marker} {}  {state:<7}  {}  {synced}",
            leaf.rev, leaf.client_rev_by
        );
    }
    Ok(())
}
