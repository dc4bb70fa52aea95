//! MetricsCollector: a bounded ring buffer of agent/swarm metrics with a
//! cheap rolling summary, fed by event fan-out rather than by direct
//! service coupling.

use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::domain::models::{SubagentId, SwarmId};
use crate::services::event_bus::EventBus;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentMetrics {
    pub subagent_id: SubagentId,
    pub agent_name: String,
    pub tokens_used: u64,
    pub tool_uses: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwarmMetrics {
    pub swarm_id: SwarmId,
    pub agent_count: usize,
    pub total_tokens_used: u64,
    pub total_tool_uses: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEntry {
    Agent(AgentMetrics),
    Swarm(SwarmMetrics),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub total_tokens: u64,
    pub total_tool_uses: u32,
    pub agent_count: usize,
}

pub struct MetricsCollector {
    max_history: usize,
    entries: RwLock<VecDeque<MetricEntry>>,
    events: Arc<EventBus>,
}

impl MetricsCollector {
    pub fn new(max_history: usize, events: Arc<EventBus>) -> Self {
        Self { max_history: max_history.max(1), entries: RwLock::new(VecDeque::new()), events }
    }

    pub async fn record_agent(&self, metrics: AgentMetrics) {
        let payload = serde_json::json!({
            "subagent_id": metrics.subagent_id.to_string(),
            "agent_name": metrics.agent_name,
            "tokens_used": metrics.tokens_used,
            "tool_uses": metrics.tool_uses,
        });
        self.push(MetricEntry::Agent(metrics)).await;
        self.events.emit("metrics:agent", payload).await;
    }

    pub async fn record_swarm(&self, metrics: SwarmMetrics) {
        let payload = serde_json::json!({
            "swarm_id": metrics.swarm_id.to_string(),
            "agent_count": metrics.agent_count,
            "total_tokens_used": metrics.total_tokens_used,
        });
        self.push(MetricEntry::Swarm(metrics)).await;
        self.events.emit("metrics:swarm", payload).await;
    }

    async fn push(&self, entry: MetricEntry) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_history {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub async fn get_summary(&self) -> MetricsSummary {
        let entries = self.entries.read().await;
        let mut summary = MetricsSummary::default();
        for entry in entries.iter() {
            match entry {
                MetricEntry::Agent(a) => {
                    summary.total_tokens += a.tokens_used;
                    summary.total_tool_uses += a.tool_uses;
                    summary.agent_count += 1;
                }
                MetricEntry::Swarm(s) => {
                    summary.total_tokens += s.total_tokens_used;
                    summary.total_tool_uses += s.total_tool_uses;
                    summary.agent_count += s.agent_count;
                }
            }
        }
        summary
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_metrics(tokens: u64) -> AgentMetrics {
        AgentMetrics { subagent_id: SubagentId::new(), agent_name: "researcher".to_string(), tokens_used: tokens, tool_uses: 1, duration_ms: 10 }
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest_when_full() {
        let collector = MetricsCollector::new(2, Arc::new(EventBus::new()));
        collector.record_agent(agent_metrics(1)).await;
        collector.record_agent(agent_metrics(2)).await;
        collector.record_agent(agent_metrics(3)).await;
        assert_eq!(collector.len().await, 2);
    }

    #[tokio::test]
    async fn summary_aggregates_agent_and_swarm_entries() {
        let collector = MetricsCollector::new(10, Arc::new(EventBus::new()));
        collector.record_agent(agent_metrics(100)).await;
        collector
            .record_swarm(SwarmMetrics {
                swarm_id: SwarmId::new(),
                agent_count: 3,
                total_tokens_used: 500,
                total_tool_uses: 7,
                duration_ms: 1000,
            })
            .await;

        let summary = collector.get_summary().await;
        assert_eq!(summary.total_tokens, 600);
        assert_eq!(summary.total_tool_uses, 8);
        assert_eq!(summary.agent_count, 4);
    }
}
