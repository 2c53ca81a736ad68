use super::{AgentTool, ContentExtractionTool, GenericEndpointTool, ToolInfo, WebSearchTool};
use crate::config::{resolve_config_snapshot_hash, SettingsStore, ToolDescriptor, ToolKind};
use crate::error::ToolBuildError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Backends compiled into this binary that descriptors may depend on.
pub const AVAILABLE_DEPENDENCIES: &[&str] = &["http", "html", "json"];

/// Immutable, ordered set of live capability instances.
#[derive(Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn AgentTool>>,
}

impl ToolSet {
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.iter().find(|t| t.info().name == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.info().name).collect()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| t.info()).collect()
    }

    /// Tool definitions for a model request.
    pub fn function_definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|t| t.info().function_definition())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn AgentTool>> {
        self.tools.iter()
    }
}

/// Diagnostic view of one active tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ToolKind,
    pub category: String,
    pub dependencies: Vec<String>,
    pub input_params: Vec<String>,
    pub body_fields: Vec<String>,
    pub input_schema: serde_json::Value,
}

/// Build one capability from its descriptor.
pub fn build_tool(descriptor: &ToolDescriptor) -> Result<Arc<dyn AgentTool>, ToolBuildError> {
    if let Some(dep) = descriptor
        .dependencies
        .iter()
        .find(|d| !AVAILABLE_DEPENDENCIES.contains(&d.as_str()))
    {
        return Err(ToolBuildError::MissingDependency {
            tool: descriptor.name.clone(),
            dependency: dep.clone(),
        });
    }

    let tool: Arc<dyn AgentTool> = match descriptor.kind {
        ToolKind::WebSearch => Arc::new(WebSearchTool::from_descriptor(descriptor)?),
        ToolKind::ContentExtraction => Arc::new(ContentExtractionTool::from_descriptor(descriptor)?),
        ToolKind::GenericEndpoint => Arc::new(GenericEndpointTool::from_descriptor(descriptor)?),
    };
    Ok(tool)
}

/// Build the active set from a descriptor list.
///
/// Disabled descriptors are skipped, the first of several same-named
/// descriptors wins, and descriptors that fail to build are logged and
/// omitted.
pub fn build_tool_set(descriptors: &[ToolDescriptor]) -> (ToolSet, Vec<ToolBuildError>) {
    let mut seen = HashSet::new();
    let mut tools = Vec::new();
    let mut errors = Vec::new();

    for descriptor in descriptors {
        if !descriptor.enabled {
            debug!(tool = %descriptor.name, "Skipping disabled tool");
            continue;
        }
        if seen.contains(descriptor.name.as_str()) {
            warn!(tool = %descriptor.name, "Duplicate tool name, keeping first occurrence");
            continue;
        }
        match build_tool(descriptor) {
            Ok(tool) => {
                seen.insert(descriptor.name.as_str());
                tools.push(tool);
            }
            Err(e) => {
                warn!(tool = %descriptor.name, error = %e, "Tool failed to build, omitting");
                errors.push(e);
            }
        }
    }

    (ToolSet { tools }, errors)
}

fn descriptors_hash(descriptors: &[ToolDescriptor]) -> String {
    let value = serde_json::to_value(descriptors).unwrap_or_default();
    resolve_config_snapshot_hash(&value)
}

struct RefreshState {
    last_refresh: Option<Instant>,
    hash: Option<String>,
}

/// Turns persisted descriptors into live capability instances.
///
/// The registry builds sets and remembers what it last built from. The set
/// itself belongs to the Ready agent resource and is released with it.
pub struct ToolRegistry {
    store: Arc<SettingsStore>,
    refresh: Mutex<RefreshState>,
}

impl ToolRegistry {
    pub fn new(store: Arc<SettingsStore>) -> Self {
        Self {
            store,
            refresh: Mutex::new(RefreshState {
                last_refresh: None,
                hash: None,
            }),
        }
    }

    /// Build a fresh set from the current settings.
    pub fn build(&self) -> Arc<ToolSet> {
        let settings = self.store.snapshot();
        let descriptors = &settings.agent_config.tools;
        let (set, errors) = build_tool_set(descriptors);

        let mut state = self.refresh.lock();
        state.last_refresh = Some(Instant::now());
        state.hash = Some(descriptors_hash(descriptors));
        drop(state);

        info!(
            tools = set.len(),
            failed = errors.len(),
            "Tool registry built"
        );
        Arc::new(set)
    }

    /// Build a replacement for `previous` with fresh instances.
    pub fn rebuild(&self, previous: &ToolSet) -> Arc<ToolSet> {
        let before: HashSet<String> = previous.names().into_iter().collect();
        let set = self.build();
        let after: HashSet<String> = set.names().into_iter().collect();

        let added: Vec<_> = after.difference(&before).collect();
        let removed: Vec<_> = before.difference(&after).collect();
        if !added.is_empty() || !removed.is_empty() {
            info!(?added, ?removed, "Tool set changed");
        }
        set
    }

    /// Whether the cooldown has elapsed and descriptors changed since the
    /// last build, first picking up out-of-band edits to the settings file.
    pub async fn is_refresh_due(&self) -> bool {
        let interval = Duration::from_secs(self.store.snapshot().agent_config.tool_refresh_interval_secs);
        {
            let mut state = self.refresh.lock();
            if let Some(last) = state.last_refresh {
                if last.elapsed() < interval {
                    return false;
                }
            }
            state.last_refresh = Some(Instant::now());
        }

        if let Err(e) = self.store.reload_from_disk().await {
            debug!(error = %e, "Settings reload skipped during tool refresh");
        }

        let hash = descriptors_hash(&self.store.snapshot().agent_config.tools);
        self.refresh.lock().hash.as_deref() != Some(hash.as_str())
    }

    /// Forget the last build.
    pub fn reset(&self) {
        self.refresh.lock().hash = None;
    }

    /// Describe a set for status output.
    pub fn describe(&self, set: &ToolSet) -> Vec<ToolDescription> {
        let settings = self.store.snapshot();
        set.infos()
            .into_iter()
            .map(|info| {
                let descriptor = settings
                    .agent_config
                    .tools
                    .iter()
                    .find(|d| d.name == info.name);
                ToolDescription {
                    input_params: descriptor
                        .map(|d| d.input.param.keys().cloned().collect())
                        .unwrap_or_default(),
                    body_fields: descriptor
                        .map(|d| d.input.body.keys().cloned().collect())
                        .unwrap_or_default(),
                    name: info.name,
                    kind: info.kind,
                    category: info.category,
                    dependencies: info.dependencies,
                    input_schema: info.input_schema,
                }
            })
            .collect()
    }
}
