//! Builds runnable steps from a pipeline document using synthetic in-memory adapters.
//!
//! Each declared source becomes a [`SyntheticSource`] of the declared size and each sink a
//! [`MemorySink`] whose destination handle is returned to the caller. An optional fault
//! injector sits between the sources and the sinks and raises on a chosen invocation, which
//! makes the checkpoint and resume path observable without a real failing adapter.

use std::sync::{Arc, Mutex};

use anyhow::bail;
use chunkflow_types::{PipelineDefinition, Table};
use indexmap::IndexMap;
use tracing::debug;

use crate::error::ConfigurationError;
use crate::memory::{MemorySink, SyntheticSource};
use crate::step::Step;

/// Identifier of the injected failing step. Pipeline identifiers cannot start with `_`.
pub const FAULT_INJECTOR_ID: &str = "_fault_injector";

/// Knobs for a simulated run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationOptions {
    /// Raise on the Nth invocation of the fault injector, counted from 1.
    pub fail_at_pass: Option<u64>,
}

/// Destination tables of the simulated sinks, keyed by sink identifier.
pub type SinkHandles = IndexMap<String, Arc<Mutex<Table>>>;

/// Steps ready for the planner plus handles to every sink destination.
pub struct Simulation {
    pub steps: Vec<Step>,
    pub sinks: SinkHandles,
}

/// Builds sources, the optional fault injector, and sinks for `definition`, in that order.
pub fn build_simulation(definition: &PipelineDefinition, options: SimulationOptions) -> Result<Simulation, ConfigurationError> {
    let mut steps = Vec::with_capacity(definition.sources.len() + definition.sinks.len() + 1);
    let mut sinks = IndexMap::new();

    for (source_id, source) in &definition.sources {
        let mut builder = Step::source(
            source_id.clone(),
            SyntheticSource::new(source_id.clone(), source.rows).with_chunk_size(source.chunk_size),
        )
        .error_policy(source.on_error);
        if let Some(name) = &source.name {
            builder = builder.name(name.clone());
        }
        steps.push(builder.build()?);
    }

    if let Some(fail_at) = options.fail_at_pass {
        debug!(fail_at, "installing fault injector");
        let mut invocations = 0u64;
        let injector = Step::builder(FAULT_INJECTOR_ID, move |_call| {
            invocations += 1;
            if invocations == fail_at {
                bail!("injected failure on invocation {invocations}");
            }
            Ok(Vec::new())
        })
        .name("fault injector")
        .build()?;
        steps.push(injector);
    }

    for (sink_id, sink) in &definition.sinks {
        let memory_sink = MemorySink::new().with_mode(sink.mode);
        sinks.insert(sink_id.clone(), memory_sink.destination());

        let mut builder = Step::sink(sink_id.clone(), sink.input.clone(), memory_sink).error_policy(sink.on_error);
        if let Some(name) = &sink.name {
            builder = builder.name(name.clone());
        }
        steps.push(builder.build()?);
    }

    Ok(Simulation { steps, sinks })
}
