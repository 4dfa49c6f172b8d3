//! The filter state machine: ordered steps, dirty tracking, memoized
//! destinations and composite recursion.

use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};

use fxflow_core::ParamBlob;
use fxflow_gpu::{
    ComputeError, ComputeResult, Context, ExecMode, ImageProvider, RegisterError, Stage,
    StageConfig,
};

use crate::observers::{CompletionNotice, FrameStamp, Observers};

/// One entry in a filter's ordered execution list: either a leaf kernel
/// dispatch or a nested filter applied as a single step.
pub enum Step {
    /// A kernel dispatch with its captured parameter snapshot.
    Stage {
        /// Step name, unique within the owning filter.
        name: String,
        /// The registered kernel handle.
        stage: Stage,
        /// Parameter snapshot captured at the last setter call.
        config: StageConfig,
    },
    /// A child filter; its own steps run as one unit at this position.
    Filter(Filter),
}

impl Step {
    fn name(&self) -> &str {
        match self {
            Step::Stage { name, .. } => name,
            Step::Filter(f) => f.name(),
        }
    }
}

/// A composable graph node: ordered [`Step`]s, a source, a memoized
/// destination and four observer registries.
///
/// State machine is `{clean, dirty} x {enabled, disabled}`. Every setter
/// marks the filter dirty; `apply` recomputes only when dirty, hands the
/// source through by identity when disabled, and otherwise returns the
/// cached destination untouched.
///
/// A filter is single-writer: mutate it from one thread at a time (wrap it
/// in a lock to share). Completion callbacks fire destination observers on
/// the context's worker thread in async mode.
pub struct Filter {
    ctx: Context,
    name: String,
    steps: Vec<Step>,
    source: Option<ImageProvider>,
    destination: ImageProvider,
    ping: ImageProvider,
    pong: ImageProvider,
    dirty: bool,
    enabled: bool,
    mode: ExecMode,
    generation: AtomicU64,
    observers: Observers,
}

impl Filter {
    /// A new, empty, enabled and dirty filter bound to `ctx`.
    pub fn new(ctx: &Context, name: impl Into<String>) -> Self {
        Self {
            ctx: ctx.clone(),
            name: name.into(),
            steps: Vec::new(),
            source: None,
            destination: ImageProvider::new(),
            ping: ImageProvider::new(),
            pong: ImageProvider::new(),
            dirty: true,
            enabled: true,
            mode: ExecMode::Sync,
            generation: AtomicU64::new(0),
            observers: Observers::new(),
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Filter name, unique among siblings when nested.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning context.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// `true` when the cached destination is stale, here or in any nested
    /// child.
    pub fn is_dirty(&self) -> bool {
        self.dirty
            || self.steps.iter().any(|s| match s {
                Step::Filter(child) => child.is_dirty(),
                Step::Stage { .. } => false,
            })
    }

    /// `true` unless the filter was switched to pass-through.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Submission mode used by `apply`. Defaults to [`ExecMode::Sync`].
    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Sets the submission mode for subsequent applies.
    pub fn set_mode(&mut self, mode: ExecMode) {
        self.mode = mode;
    }

    /// Generation of the most recently requested recomputation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Marks the destination stale and fires the dirty observers.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
        self.observers.fire_dirty();
    }

    /// Toggles pass-through. Any change marks the filter dirty and fires
    /// the enabling observers with the new state.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.observers.fire_enabling(enabled);
        self.set_dirty();
    }

    /// Attaches (or clears) the input image. Fires the new-source
    /// observers and marks the filter dirty.
    pub fn set_source(&mut self, source: Option<ImageProvider>) {
        if let Some(provider) = &source {
            self.observers.fire_source(provider);
        }
        self.source = source;
        self.set_dirty();
    }

    /// The currently attached input, if any.
    pub fn source(&self) -> Option<&ImageProvider> {
        self.source.as_ref()
    }

    /// The memoized output. Identity is stable across recomputes of an
    /// unchanged source size; content is valid once `apply` has succeeded.
    pub fn destination(&self) -> &ImageProvider {
        &self.destination
    }

    /// Suppresses or restores observer delivery. While suppressed, state
    /// transitions still happen; only the callbacks are skipped.
    pub fn set_observers_enabled(&mut self, enabled: bool) {
        self.observers.enabled = enabled;
    }

    /// Drops destination and transient allocations and marks the filter
    /// dirty. The next apply reallocates from scratch.
    pub fn flush(&mut self) {
        self.destination.release();
        self.ping.release();
        self.pong.release();
        self.dirty = true;
        for step in &mut self.steps {
            if let Step::Filter(child) = step {
                child.flush();
            }
        }
    }

    // ========================================================================
    // Assembly
    // ========================================================================

    /// Number of steps in the execution list.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// `true` when no steps have been added.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `true` when a step (stage or child filter) with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s.name() == name)
    }

    /// Appends a kernel by registry identity with default (zero) params.
    pub fn add_kernel(&mut self, kernel: &str) -> Result<(), RegisterError> {
        self.add_kernel_with(kernel, ParamBlob::empty())
    }

    /// Appends a kernel with an initial parameter snapshot.
    pub fn add_kernel_with(
        &mut self,
        kernel: &str,
        params: ParamBlob,
    ) -> Result<(), RegisterError> {
        self.insert_kernel_at(self.steps.len(), kernel, params)
    }

    /// Inserts a kernel at `index` in the execution order.
    pub fn insert_kernel_at(
        &mut self,
        index: usize,
        kernel: &str,
        params: ParamBlob,
    ) -> Result<(), RegisterError> {
        self.check_insert(index, kernel)?;
        let stage = self.ctx.registry().register(kernel)?;
        self.insert_stage_at(index, kernel, stage, params)
    }

    /// Appends an already registered stage under a custom step name.
    /// Useful when the same kernel appears twice in one filter.
    pub fn add_stage(
        &mut self,
        name: &str,
        stage: Stage,
        params: ParamBlob,
    ) -> Result<(), RegisterError> {
        self.insert_stage_at(self.steps.len(), name, stage, params)
    }

    /// Inserts an already registered stage at `index`.
    pub fn insert_stage_at(
        &mut self,
        index: usize,
        name: &str,
        stage: Stage,
        params: ParamBlob,
    ) -> Result<(), RegisterError> {
        self.check_insert(index, name)?;
        self.steps.insert(
            index,
            Step::Stage {
                name: name.to_string(),
                stage,
                config: StageConfig::new(params),
            },
        );
        self.set_dirty();
        Ok(())
    }

    fn check_insert(&self, index: usize, name: &str) -> Result<(), RegisterError> {
        if index > self.steps.len() {
            return Err(RegisterError::OutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        if self.contains(name) {
            return Err(RegisterError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    /// Inserts a kernel immediately before the named existing step.
    pub fn insert_kernel_before(
        &mut self,
        anchor: &str,
        kernel: &str,
        params: ParamBlob,
    ) -> Result<(), RegisterError> {
        let index = self.index_of(anchor)?;
        self.insert_kernel_at(index, kernel, params)
    }

    /// Inserts a kernel immediately after the named existing step.
    pub fn insert_kernel_after(
        &mut self,
        anchor: &str,
        kernel: &str,
        params: ParamBlob,
    ) -> Result<(), RegisterError> {
        let index = self.index_of(anchor)?;
        self.insert_kernel_at(index + 1, kernel, params)
    }

    /// Appends a child filter as one step. The child keeps its own state
    /// machine and observers; during the parent's apply its source is fed
    /// from the previous step's output.
    pub fn add_filter(&mut self, child: Filter) -> Result<(), RegisterError> {
        self.insert_filter_at(self.steps.len(), child)
    }

    /// Inserts a child filter at `index` in the execution order.
    pub fn insert_filter_at(&mut self, index: usize, child: Filter) -> Result<(), RegisterError> {
        self.check_insert(index, child.name())?;
        self.steps.insert(index, Step::Filter(child));
        self.set_dirty();
        Ok(())
    }

    /// Removes the named stage step.
    pub fn remove_stage(&mut self, name: &str) -> Result<(), RegisterError> {
        let index = self
            .steps
            .iter()
            .position(|s| matches!(s, Step::Stage { name: n, .. } if n == name))
            .ok_or_else(|| RegisterError::NotFound(name.to_string()))?;
        self.steps.remove(index);
        self.set_dirty();
        Ok(())
    }

    /// Removes the named child filter, returning it.
    pub fn remove_filter(&mut self, name: &str) -> Result<Filter, RegisterError> {
        let index = self
            .steps
            .iter()
            .position(|s| matches!(s, Step::Filter(f) if f.name() == name))
            .ok_or_else(|| RegisterError::NotFound(name.to_string()))?;
        let Step::Filter(child) = self.steps.remove(index) else {
            unreachable!()
        };
        self.set_dirty();
        Ok(child)
    }

    /// Clears the execution list.
    pub fn remove_all(&mut self) {
        self.steps.clear();
        self.set_dirty();
    }

    /// Replaces the parameter snapshot of the named stage. The old
    /// snapshot stays bound to any in-flight submission.
    pub fn set_params(&mut self, name: &str, params: ParamBlob) -> Result<(), RegisterError> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| matches!(s, Step::Stage { name: n, .. } if n == name))
            .ok_or_else(|| RegisterError::NotFound(name.to_string()))?;
        if let Step::Stage { config, .. } = step {
            *config = StageConfig::new(params);
        }
        self.set_dirty();
        Ok(())
    }

    /// Mutable access to a nested child filter.
    pub fn filter_mut(&mut self, name: &str) -> Option<&mut Filter> {
        self.steps.iter_mut().find_map(|s| match s {
            Step::Filter(f) if f.name() == name => Some(f),
            _ => None,
        })
    }

    fn index_of(&self, name: &str) -> Result<usize, RegisterError> {
        self.steps
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| RegisterError::NotFound(name.to_string()))
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Subscribes to source attachment. Fires on the mutating thread.
    pub fn on_new_source(&mut self, f: impl FnMut(&ImageProvider) + Send + 'static) {
        self.observers.subscribe_source(Box::new(f));
    }

    /// Subscribes to dirty transitions. Fires on the mutating thread,
    /// once per dirtying mutation.
    pub fn on_dirty(&mut self, f: impl FnMut() + Send + 'static) {
        self.observers.subscribe_dirty(Box::new(f));
    }

    /// Subscribes to enabled/disabled transitions.
    pub fn on_enabling(&mut self, f: impl FnMut(bool) + Send + 'static) {
        self.observers.subscribe_enabling(Box::new(f));
    }

    /// Subscribes to destination updates. Fires after GPU completion, in
    /// subscription order, with a latest-wins generation stamp. In async
    /// mode the callback runs on the context's worker thread.
    pub fn on_destination_updated(
        &mut self,
        f: impl FnMut(&ImageProvider, FrameStamp) + Send + 'static,
    ) {
        self.observers.subscribe_destination(Box::new(f));
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Recomputes the destination if needed and returns it.
    ///
    /// Disabled: the destination becomes the source itself (same buffer
    /// identity), no GPU work. Clean: the cached destination is returned
    /// with zero dispatches. Dirty: all steps are encoded into one command
    /// buffer in insertion order and submitted in the configured mode;
    /// destination observers fire on completion, children first.
    pub fn apply(&mut self) -> ComputeResult<ImageProvider> {
        let source = self.source.clone().ok_or(ComputeError::NoSource)?;

        if !self.enabled {
            self.destination.adopt(&source);
            self.dirty = false;
            return Ok(self.destination.clone());
        }

        if !self.is_dirty() {
            trace!("filter '{}' clean, returning cached destination", self.name);
            return Ok(self.destination.clone());
        }

        // A destination left aliasing the source by a disabled pass-through
        // must not be dispatched into; force a fresh allocation.
        if self.destination.aliases(&source) {
            self.destination.release();
        }
        self.destination
            .reuse(&self.ctx, source.size(), source.format())?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let stamp = FrameStamp::new(generation);
        debug!("filter '{}' recomputing (gen {generation})", self.name);

        let mut encoder = self.ctx.create_encoder(&self.name);
        let mut notices = Vec::new();
        let destination = self.destination.clone();
        self.encode_steps(&mut encoder, &source, &destination, &mut notices)?;
        if self.observers.enabled {
            notices.push(self.observers.destination_notice(destination, stamp));
        }

        self.dirty = false;
        let ctx = self.ctx.clone();
        ctx.submit_with(self.mode, encoder.finish(), move || {
            for notice in notices {
                notice.fire();
            }
        })?;

        Ok(self.destination.clone())
    }

    /// Encodes this filter's steps, reading `source` and leaving the final
    /// result in `output`. Transients alternate between the two pooled
    /// ping-pong providers; they are never visible outside this call.
    fn encode_steps(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        source: &ImageProvider,
        output: &ImageProvider,
        notices: &mut Vec<CompletionNotice>,
    ) -> ComputeResult<()> {
        if self.steps.is_empty() {
            return source.encode_copy_to(encoder, output);
        }

        let size = source.size();
        let format = source.format();
        let last = self.steps.len() - 1;
        let ctx = self.ctx.clone();

        // Borrow the transients out so steps can be iterated mutably.
        let mut ping = std::mem::take(&mut self.ping);
        let mut pong = std::mem::take(&mut self.pong);

        let mut current = source.clone();
        let result: ComputeResult<()> = (|| {
            for (i, step) in self.steps.iter_mut().enumerate() {
                match step {
                    Step::Stage {
                        stage, config, ..
                    } => {
                        let target = if i == last {
                            output.clone()
                        } else {
                            let transient = if i % 2 == 0 { &mut ping } else { &mut pong };
                            transient.reuse(&ctx, size, format)?;
                            transient.clone()
                        };
                        stage.dispatch(&ctx, encoder, config, &current, &target)?;
                        current = target;
                    }
                    Step::Filter(child) => {
                        let produced = child.encode_as_step(encoder, &current, notices)?;
                        if i == last {
                            produced.encode_copy_to(encoder, output)?;
                            current = output.clone();
                        } else {
                            current = produced;
                        }
                    }
                }
            }
            Ok(())
        })();

        self.ping = ping;
        self.pong = pong;
        result
    }

    /// Runs this filter as one step of a parent: input becomes the source,
    /// the child's own destination receives the result, and the child's
    /// destination notice is queued on the parent's submission.
    fn encode_as_step(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        input: &ImageProvider,
        notices: &mut Vec<CompletionNotice>,
    ) -> ComputeResult<ImageProvider> {
        // The parent re-encodes every step when dirty, so this input's
        // contents are about to be rewritten even when its identity is
        // unchanged. Re-sourcing unconditionally keeps the child's cached
        // destination from being served stale. Done without set_source:
        // the input is a parent transient, and transients never reach
        // observers.
        self.source = Some(input.clone());
        self.dirty = true;

        if !self.enabled {
            self.destination.adopt(input);
            self.dirty = false;
            return Ok(self.destination.clone());
        }

        if self.destination.aliases(input) {
            self.destination.release();
        }
        self.destination
            .reuse(&self.ctx, input.size(), input.format())?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let destination = self.destination.clone();
        let input = input.clone();
        self.encode_steps(encoder, &input, &destination, notices)?;
        if self.observers.enabled {
            notices.push(
                self.observers
                    .destination_notice(destination.clone(), FrameStamp::new(generation)),
            );
        }
        self.dirty = false;
        Ok(destination)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("dirty", &self.dirty)
            .field("enabled", &self.enabled)
            .finish()
    }
}
