//! Context Manager (C5): token counting and truncation policy.
//!
//! Two variants selected at construction (`ContextVariant`): *standard*
//! drops evicted turns outright; *file-spill* writes them to the
//! workspace before dropping them from the live transcript, grounded on
//! the same "don't lose data, just stop showing it to the model" idea
//! as the source's oversized-tool-result pruning.

use std::path::Path;
use std::sync::Arc;

use agentcore_domain::config::{ContextConfig, ContextVariant};
use agentcore_domain::error::Result;
use agentcore_domain::message::Turn;
use agentcore_domain::trace::TraceEvent;
use agentcore_workspace::WorkspaceAllocator;
use uuid::Uuid;

/// Rough token estimate: ~4 characters per token, with a one-token floor
/// per turn so an all-whitespace transcript still counts as non-empty.
/// There is no tokenizer dependency in this stack; this mirrors the
/// cheap character-threshold heuristics the source uses elsewhere for
/// the same kind of budget decision.
fn estimate_tokens(turns: &[Turn]) -> u32 {
    let mut total = 0u32;
    for turn in turns {
        let chars: usize = match turn {
            Turn::User(blocks) => blocks
                .iter()
                .map(|b| match b {
                    agentcore_domain::message::UserBlock::Text { text } => text.len(),
                    agentcore_domain::message::UserBlock::Image { data_base64, .. } => {
                        data_base64.len()
                    }
                    agentcore_domain::message::UserBlock::ToolResult { output, .. } => {
                        output.len()
                    }
                })
                .sum(),
            Turn::Assistant(blocks) => blocks
                .iter()
                .map(|b| match b {
                    agentcore_domain::message::AssistantBlock::Text { text } => text.len(),
                    agentcore_domain::message::AssistantBlock::ToolCall(tc) => {
                        tc.name.len() + tc.input.to_string().len()
                    }
                })
                .sum(),
        };
        total += ((chars / 4).max(1)) as u32;
    }
    total
}

pub struct ContextManager {
    variant: ContextVariant,
    token_budget: u32,
    preserve_tail_pairs: usize,
    workspace: Arc<WorkspaceAllocator>,
}

impl ContextManager {
    pub fn new(config: &ContextConfig, workspace: Arc<WorkspaceAllocator>) -> Self {
        Self {
            variant: config.variant,
            token_budget: config.token_budget,
            preserve_tail_pairs: config.preserve_tail_pairs,
            workspace,
        }
    }

    pub fn count_tokens(&self, turns: &[Turn]) -> u32 {
        estimate_tokens(turns)
    }

    /// Apply the middle-drop truncation policy if `turns` exceeds the
    /// token budget. Returns the (possibly unchanged) transcript; the
    /// caller is responsible for `History::replace`-ing it back in.
    pub async fn apply_truncation_if_needed(
        &self,
        session_id: Uuid,
        workspace_dir: &Path,
        turns: Vec<Turn>,
    ) -> Result<Vec<Turn>> {
        let tail_len = (self.preserve_tail_pairs * 2).min(turns.len().saturating_sub(1));
        if turns.len() <= 1 || self.count_tokens(&turns) <= self.token_budget {
            return Ok(turns);
        }

        let head = turns[0].clone();
        let tail_start = turns.len() - tail_len;
        let mut middle: Vec<Turn> = turns[1..tail_start].to_vec();
        let tail: Vec<Turn> = turns[tail_start..].to_vec();
        let mut dropped = 0usize;

        let fits = |head: &Turn, middle: &[Turn], tail: &[Turn]| {
            let mut probe = Vec::with_capacity(middle.len() + tail.len() + 1);
            probe.push(head.clone());
            probe.extend_from_slice(middle);
            probe.extend_from_slice(tail);
            self.count_tokens(&probe) <= self.token_budget
        };

        while !middle.is_empty() && !fits(&head, &middle, &tail) {
            let evicted = middle.remove(0);
            if self.variant == ContextVariant::FileSpill {
                self.spill(workspace_dir, session_id, dropped, &evicted).await?;
            }
            dropped += 1;
        }

        if dropped == 0 {
            return Ok(turns);
        }

        TraceEvent::TruncationApplied {
            session_id: session_id.to_string(),
            dropped_turns: dropped,
            spilled: self.variant == ContextVariant::FileSpill,
        }
        .emit();

        let mut result = Vec::with_capacity(middle.len() + tail.len() + 1);
        result.push(head);
        result.extend(middle);
        result.extend(tail);
        Ok(result)
    }

    async fn spill(&self, workspace_dir: &Path, session_id: Uuid, index: usize, turn: &Turn) -> Result<()> {
        let path = self.workspace.resolve(workspace_dir, &format!("context_spill_{index}.json"))?;
        let json = serde_json::to_vec_pretty(turn)?;
        tokio::fs::write(&path, json).await?;
        tracing::debug!(session_id = %session_id, path = %path.display(), "spilled evicted turn to workspace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_domain::config::WorkspaceConfig;
    use agentcore_domain::message::UserBlock;

    fn long_turn(n: usize) -> Turn {
        Turn::User(vec![UserBlock::Text { text: "x".repeat(n) }])
    }

    async fn manager(tmp: &Path, budget: u32) -> ContextManager {
        let alloc = Arc::new(WorkspaceAllocator::new(&WorkspaceConfig { root: tmp.to_string_lossy().to_string() }));
        ContextManager::new(
            &ContextConfig { token_budget: budget, variant: ContextVariant::Standard, preserve_tail_pairs: 1 },
            alloc,
        )
    }

    #[tokio::test]
    async fn leaves_small_transcripts_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path(), 10_000).await;
        let turns = vec![long_turn(40), Turn::Assistant(vec![])];
        let out = mgr
            .apply_truncation_if_needed(Uuid::new_v4(), tmp.path(), turns.clone())
            .await
            .unwrap();
        assert_eq!(out.len(), turns.len());
    }

    #[tokio::test]
    async fn drops_from_the_middle_preserving_head_and_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path(), 50).await;
        let mut turns = vec![long_turn(20)];
        for _ in 0..10 {
            turns.push(long_turn(200));
            turns.push(long_turn(200));
        }
        let original_head = turns[0].clone();
        let original_tail = turns[turns.len() - 2..].to_vec();
        let out = mgr
            .apply_truncation_if_needed(Uuid::new_v4(), tmp.path(), turns.clone())
            .await
            .unwrap();
        assert!(out.len() < turns.len());
        assert_eq!(out[0].text(), original_head.text());
        assert_eq!(out[out.len() - 2].text(), original_tail[0].text());
        assert_eq!(out[out.len() - 1].text(), original_tail[1].text());
    }

    #[tokio::test]
    async fn file_spill_writes_evicted_turns() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = Arc::new(WorkspaceAllocator::new(&WorkspaceConfig { root: tmp.path().to_string_lossy().to_string() }));
        let mgr = ContextManager::new(
            &ContextConfig { token_budget: 50, variant: ContextVariant::FileSpill, preserve_tail_pairs: 1 },
            alloc,
        );
        let session_id = Uuid::new_v4();
        let ws_dir = tmp.path().join(session_id.to_string());
        tokio::fs::create_dir_all(&ws_dir).await.unwrap();

        let mut turns = vec![long_turn(20)];
        for _ in 0..6 {
            turns.push(long_turn(200));
            turns.push(long_turn(200));
        }
        mgr.apply_truncation_if_needed(session_id, &ws_dir, turns).await.unwrap();
        assert!(ws_dir.join("context_spill_0.json").exists());
    }
}
