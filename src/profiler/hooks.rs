// Observer hooks at the access-path trait boundary
//
// Every `open`/`get_record` on every node runs through these two functions.
// They are deliberately cheap when no session is active or the session is
// paused: one optional lookup, no timestamps, no allocation.

use super::plugin::RecordSourceEvent;
use crate::engine::EngineContext;
use crate::exec::Request;
use crate::recsrc::AccessPathIds;
use std::time::Instant;

/// Called before the node's internal entry point. Performs the
/// define-on-first-use work (on open only) and starts the stopwatch when
/// the backend wants timing events.
pub(crate) fn before_record_source(
    ctx: &mut EngineContext<'_>,
    req: &Request,
    ids: AccessPathIds,
    event: RecordSourceEvent,
) -> Option<Instant> {
    let profiler = ctx.profiler_opt()?;

    if !profiler.is_active() {
        return None;
    }

    if event == RecordSourceEvent::Open {
        profiler.prepare_record_source(req, ids);
    }

    profiler.wants_record_source_events().then(Instant::now)
}

/// Called after the node's internal entry point returns, successful or not.
pub(crate) fn after_record_source(
    ctx: &mut EngineContext<'_>,
    req: &Request,
    ids: AccessPathIds,
    event: RecordSourceEvent,
    started: Option<Instant>,
) {
    let Some(started) = started else {
        return;
    };
    let elapsed_ticks = started.elapsed().as_nanos() as u64;

    if let Some(profiler) = ctx.profiler_opt() {
        profiler.on_record_source_event(req, ids, event, elapsed_ticks);
    }
}
