//! Stream routing: one endpoint-and-version scoped stream fed from the category streams.
//!
//! The log links every event whose type the endpoint knows from the
//! `$ce-DOMAIN`, `$ce-OOB` and `$ce-POCO` category streams into a single
//! routed stream (`"{endpoint}.{major}.{minor}"` without dashes). The consumer
//! then holds one durable subscription on that stream.
//!
//! The routing definition itself is a small script owned by the log; this
//! module only fills in the source list, the target stream and one link
//! statement per event type.

use tracing::{info, instrument, warn};

use eventline_core::{Endpoint, SchemaVersion};
use eventline_events::StreamCategory;

use crate::event_log::{EventLog, EventLogError};

/// Name of the log's category index.
pub const CATEGORY_INDEX: &str = "$by_category";

/// Stream name for an endpoint at a schema version; dashes are removed.
pub fn routed_stream_name(endpoint: &Endpoint, version: SchemaVersion) -> String {
    format!("{endpoint}.{version}").replace('-', "")
}

/// Name under which the routing for `stream` is installed.
pub fn routing_name(stream: &str) -> String {
    format!("{stream}.app.projection")
}

/// Who subscribes, to what, under which group.
///
/// Rebuilt identically on every reconnect so the log resumes the same group
/// from its last acknowledged position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTarget {
    pub endpoint: Endpoint,
    pub version: SchemaVersion,
    pub stream: String,
    pub group: String,
}

impl SubscriptionTarget {
    pub fn new(endpoint: Endpoint, version: SchemaVersion) -> Self {
        let stream = routed_stream_name(&endpoint, version);
        Self {
            group: stream.clone(),
            stream,
            endpoint,
            version,
        }
    }
}

/// Parsed form of a routing definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDefinition {
    sources: Vec<String>,
    target: String,
    event_types: Vec<String>,
}

impl RoutingDefinition {
    /// Link `event_types` from all three category streams into `target`.
    ///
    /// Event types are sorted and de-duplicated so equal inputs always render
    /// to byte-identical definitions.
    pub fn new<I, S>(target: impl Into<String>, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut event_types: Vec<String> = event_types.into_iter().map(Into::into).collect();
        event_types.sort();
        event_types.dedup();

        Self {
            sources: StreamCategory::ALL.iter().map(|c| c.category_stream()).collect(),
            target: target.into(),
            event_types,
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn event_types(&self) -> &[String] {
        &self.event_types
    }

    /// Whether an event of `event_type` read from `source` is linked into the target.
    pub fn links(&self, source: &str, event_type: &str) -> bool {
        self.sources.iter().any(|s| s == source)
            && self.event_types.binary_search_by(|t| t.as_str().cmp(event_type)).is_ok()
    }

    /// Render the script installed on the log.
    pub fn render(&self) -> String {
        let sources = self
            .sources
            .iter()
            .map(|s| quote(s))
            .collect::<Vec<_>>()
            .join(",");
        let functions = self
            .event_types
            .iter()
            .map(|t| format!("{}: processEvent", quote(t)))
            .collect::<Vec<_>>()
            .join(",\n");

        format!(
            "function processEvent(s,e) {{\n    linkTo({target}, e);\n}}\n\
             fromStreams([{sources}]).\nwhen({{\n{functions}\n}});",
            target = quote(&self.target),
        )
    }

    /// Parse a script produced by [`render`](Self::render).
    pub fn parse(script: &str) -> Option<Self> {
        let target = {
            let start = script.find("linkTo(")? + "linkTo(".len();
            read_quoted(&script[start..])?.0
        };

        let mut sources = Vec::new();
        let start = script.find("fromStreams([")? + "fromStreams([".len();
        let mut rest = script[start..].trim_start();
        while rest.starts_with('\'') {
            let (source, tail) = read_quoted(rest)?;
            sources.push(source);
            rest = tail.trim_start_matches(',').trim_start();
        }

        let start = script.find("when({")? + "when({".len();
        let mut event_types = Vec::new();
        for line in script[start..].lines() {
            let line = line.trim().trim_end_matches(',');
            if !line.starts_with('\'') {
                continue;
            }
            let (event_type, tail) = read_quoted(line)?;
            if tail.trim() == ": processEvent" {
                event_types.push(event_type);
            }
        }

        Some(Self {
            sources,
            target,
            event_types,
        })
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Read a single-quoted, backslash-escaped string at the start of `input`.
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut chars = input.char_indices();
    if chars.next()?.1 != '\'' {
        return None;
    }

    let mut value = String::new();
    let mut escaped = false;
    for (idx, c) in chars {
        match (escaped, c) {
            (true, c) => {
                value.push(c);
                escaped = false;
            }
            (false, '\\') => escaped = true,
            (false, '\'') => return Some((value, &input[idx + 1..])),
            (false, c) => value.push(c),
        }
    }
    None
}

/// What [`StreamRouter::setup`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// No event types are registered locally; nothing was installed.
    NothingToRoute { target: SubscriptionTarget },
    /// Routing was installed (or re-installed unchanged).
    Installed {
        target: SubscriptionTarget,
        routing_name: String,
        definition: RoutingDefinition,
    },
}

impl SetupOutcome {
    pub fn target(&self) -> &SubscriptionTarget {
        match self {
            Self::NothingToRoute { target } | Self::Installed { target, .. } => target,
        }
    }
}

/// Installs the routing that feeds an endpoint's stream.
#[derive(Debug, Clone)]
pub struct StreamRouter<L> {
    log: L,
}

impl<L: EventLog> StreamRouter<L> {
    pub fn new(log: L) -> Self {
        Self { log }
    }

    /// Ensure the category index and install routing for `event_types`.
    ///
    /// Safe to run on every start: the definition is deterministic and the log
    /// upserts it by name.
    #[instrument(skip(self, event_types), fields(endpoint = %endpoint, version = %version), err)]
    pub fn setup(
        &self,
        endpoint: &Endpoint,
        version: SchemaVersion,
        event_types: &[String],
    ) -> Result<SetupOutcome, EventLogError> {
        let target = SubscriptionTarget::new(endpoint.clone(), version);

        self.log.enable_category_index(CATEGORY_INDEX)?;

        if event_types.is_empty() {
            warn!("event consuming is enabled but no event types are registered");
            return Ok(SetupOutcome::NothingToRoute { target });
        }

        let definition = RoutingDefinition::new(target.stream.clone(), event_types.iter().cloned());
        let name = routing_name(&target.stream);
        self.log.install_routing(&name, &definition.render())?;

        info!(
            stream = %target.stream,
            routing = %name,
            event_types = definition.event_types().len(),
            "installed event routing"
        );

        Ok(SetupOutcome::Installed {
            target,
            routing_name: name,
            definition,
        })
    }
}
