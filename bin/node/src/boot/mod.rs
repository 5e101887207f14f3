pub mod graph;
pub mod monitor;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::adapter::{BoxError, Outbound, OutboundManager, OutboundProvider};
use crate::boot::graph::DependencyGraph;
use crate::boot::monitor::{StartMonitor, DEFAULT_START_TIMEOUT};

const OUTBOUND_PREFIX: &str = "outbound-";
const PROVIDER_PREFIX: &str = "outbound-provider-";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("outbound/{outbound_type}[{tag}] already exists")]
    DuplicateOutbound { outbound_type: String, tag: String },
    #[error("outbound-provider[{0}] already exists")]
    DuplicateProvider(String),
    #[error("outbound [{0}] not found")]
    OutboundNotFound(String),
    #[error("circular dependency: {0}")]
    CircularDependency(String),
    #[error("initialize outbound/{outbound_type}[{tag}]: {source}")]
    InitializeOutbound {
        outbound_type: String,
        tag: String,
        source: BoxError,
    },
    #[error("pre-start outbound-provider[{tag}]: {source}")]
    PreStartProvider { tag: String, source: BoxError },
}

enum NodeData {
    Outbound(Arc<dyn Outbound>),
    Provider(Arc<dyn OutboundProvider>),
}

fn outbound_node_id(tag: &str) -> String {
    format!("{OUTBOUND_PREFIX}{tag}")
}

fn provider_node_id(tag: &str) -> String {
    format!("{PROVIDER_PREFIX}{tag}")
}

fn render_node_id(id: &str) -> String {
    if let Some(tag) = id.strip_prefix(PROVIDER_PREFIX) {
        format!("outbound-provider[{tag}]")
    } else if let Some(tag) = id.strip_prefix(OUTBOUND_PREFIX) {
        format!("outbound[{tag}]")
    } else {
        id.to_string()
    }
}

/// Starts every outbound and provider in dependency order.
///
/// Outbounds without a lifecycle are recorded as started immediately.
/// Providers are pre-started once their dependent outbound is up, and the
/// outbounds they produce join the graph with their own dependencies. The
/// returned map holds every started outbound by tag; on error the first
/// failure aborts the whole startup.
pub async fn start_outbounds(
    outbounds: &[Arc<dyn Outbound>],
    providers: &[Arc<dyn OutboundProvider>],
    manager: &OutboundManager,
) -> Result<HashMap<String, Arc<dyn Outbound>>, StartupError> {
    let mut graph: DependencyGraph<NodeData> = DependencyGraph::new();
    let mut started: HashMap<String, Arc<dyn Outbound>> = HashMap::new();

    for outbound in outbounds {
        if outbound.as_starter().is_none() {
            started.insert(outbound.tag().to_string(), outbound.clone());
            manager.insert_outbound(outbound.clone());
            continue;
        }
        let id = outbound_node_id(outbound.tag());
        match graph.get(&id) {
            Some(node) if node.data().is_some() => {
                return Err(StartupError::DuplicateOutbound {
                    outbound_type: outbound.outbound_type().to_string(),
                    tag: outbound.tag().to_string(),
                });
            }
            Some(_) => graph.set_data(&id, NodeData::Outbound(outbound.clone())),
            None => graph.add_node(id.clone(), Some(NodeData::Outbound(outbound.clone()))),
        }
        for dependency in outbound.dependencies() {
            if started.contains_key(&dependency) {
                continue;
            }
            let dependency_id = outbound_node_id(&dependency);
            graph.ensure_node(&dependency_id);
            graph.add_edge(&dependency_id, &id);
        }
    }

    for provider in providers {
        let id = provider_node_id(provider.tag());
        if graph.get(&id).is_some() {
            return Err(StartupError::DuplicateProvider(provider.tag().to_string()));
        }
        graph.add_node(id.clone(), Some(NodeData::Provider(provider.clone())));
        if let Some(dependency) = provider.dependent_outbound() {
            if !dependency.is_empty() && !started.contains_key(dependency) {
                let dependency_id = outbound_node_id(dependency);
                graph.ensure_node(&dependency_id);
                graph.add_edge(&dependency_id, &id);
            }
        }
    }

    let monitor = StartMonitor::new(DEFAULT_START_TIMEOUT);
    let mut queue: VecDeque<String> = VecDeque::new();
    loop {
        for id in graph.startable() {
            if !id.starts_with(PROVIDER_PREFIX) {
                if let Some(tag) = id.strip_prefix(OUTBOUND_PREFIX) {
                    if started.contains_key(tag) {
                        continue;
                    }
                }
            }
            queue.push_back(id);
        }
        if queue.is_empty() {
            break;
        }
        while let Some(id) = queue.pop_front() {
            let Some(data) = graph.take_node(&id).and_then(|node| node.into_data()) else {
                continue;
            };
            match data {
                NodeData::Outbound(outbound) => {
                    start_outbound(&monitor, &outbound).await?;
                    started.insert(outbound.tag().to_string(), outbound.clone());
                    manager.insert_outbound(outbound);
                }
                NodeData::Provider(provider) => {
                    pre_start_provider(&monitor, &provider).await?;
                    manager.insert_provider(provider.clone());
                    splice_provider_outbounds(
                        &provider,
                        &mut graph,
                        &mut queue,
                        &mut started,
                        manager,
                    )?;
                }
            }
        }
    }

    if let Some(cycle) = graph.find_cycle() {
        let mut path: Vec<String> = cycle.iter().map(|id| render_node_id(id)).collect();
        path.push(render_node_id(&cycle[0]));
        return Err(StartupError::CircularDependency(path.join(" -> ")));
    }
    if let Some(ghost) = graph.ghost_ids().into_iter().next() {
        let tag = ghost
            .strip_prefix(OUTBOUND_PREFIX)
            .unwrap_or(&ghost)
            .to_string();
        return Err(StartupError::OutboundNotFound(tag));
    }

    Ok(started)
}

async fn start_outbound(
    monitor: &StartMonitor,
    outbound: &Arc<dyn Outbound>,
) -> Result<(), StartupError> {
    let Some(starter) = outbound.as_starter() else {
        return Ok(());
    };
    debug!(
        "initializing outbound/{}[{}]",
        outbound.outbound_type(),
        outbound.tag()
    );
    let _watch = monitor.watch(format!(
        "initialize outbound/{}[{}]",
        outbound.outbound_type(),
        outbound.tag()
    ));
    starter
        .start()
        .await
        .map_err(|source| StartupError::InitializeOutbound {
            outbound_type: outbound.outbound_type().to_string(),
            tag: outbound.tag().to_string(),
            source,
        })
}

async fn pre_start_provider(
    monitor: &StartMonitor,
    provider: &Arc<dyn OutboundProvider>,
) -> Result<(), StartupError> {
    debug!("pre-starting outbound-provider[{}]", provider.tag());
    let _watch = monitor.watch(format!("pre-start outbound-provider[{}]", provider.tag()));
    provider
        .pre_start()
        .await
        .map_err(|source| StartupError::PreStartProvider {
            tag: provider.tag().to_string(),
            source,
        })
}

/// Wires the outbounds a provider produced into the graph, exactly the way
/// the statically configured ones were seeded. Produced outbounds without
/// pending dependencies are queued right away.
fn splice_provider_outbounds(
    provider: &Arc<dyn OutboundProvider>,
    graph: &mut DependencyGraph<NodeData>,
    queue: &mut VecDeque<String>,
    started: &mut HashMap<String, Arc<dyn Outbound>>,
    manager: &OutboundManager,
) -> Result<(), StartupError> {
    for outbound in provider.outbounds() {
        if outbound.as_starter().is_none() {
            if started.contains_key(outbound.tag()) {
                return Err(StartupError::DuplicateOutbound {
                    outbound_type: outbound.outbound_type().to_string(),
                    tag: outbound.tag().to_string(),
                });
            }
            started.insert(outbound.tag().to_string(), outbound.clone());
            manager.insert_outbound(outbound);
            continue;
        }
        let id = outbound_node_id(outbound.tag());
        match graph.get(&id) {
            Some(node) if node.data().is_some() => {
                return Err(StartupError::DuplicateOutbound {
                    outbound_type: outbound.outbound_type().to_string(),
                    tag: outbound.tag().to_string(),
                });
            }
            Some(_) => graph.set_data(&id, NodeData::Outbound(outbound.clone())),
            None => graph.add_node(id.clone(), Some(NodeData::Outbound(outbound.clone()))),
        }
        let pending: Vec<String> = outbound
            .dependencies()
            .into_iter()
            .filter(|dependency| !started.contains_key(dependency))
            .collect();
        if pending.is_empty() && graph.get(&id).map(|node| node.prev().is_empty()) == Some(true) {
            queue.push_back(id);
            continue;
        }
        for dependency in pending {
            let dependency_id = outbound_node_id(&dependency);
            graph.ensure_node(&dependency_id);
            graph.add_edge(&dependency_id, &id);
        }
    }
    Ok(())
}
