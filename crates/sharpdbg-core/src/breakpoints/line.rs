//! Line breakpoints: stop at a source line.
//!
//! A line resolves to the innermost method whose source extent contains it.
//! When several methods share that extent (field initializers compiled into
//! every constructor) all of them are bound. Inside a method the breakpoint
//! lands on the first visible sequence point at or after the requested line.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::record::{keep_first, release_all, Binding, Record};
use super::{Breakpoint, BreakpointEvent, BreakpointId, BreakpointKind, BreakpointLocation, EventReason, HitCandidate, HitCondition, IdAllocator, KindManager};
use crate::error::Result;
use crate::runtime::{DebugRuntime, Module, NativeBreakpoint};
use crate::symbols::{MethodRange, SequencePoint, SymbolLookup, SymbolService};
use crate::types::MethodToken;

/// Front-end request for one line of a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBreakpointRequest
{
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<HitCondition>,
}

impl LineBreakpointRequest
{
    #[must_use]
    pub fn new(line: u32) -> Self
    {
        Self {
            line,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn condition(mut self, condition: &str) -> Self
    {
        self.condition = Some(condition.to_string());
        self
    }

    #[must_use]
    pub fn hit_condition(mut self, hit_condition: HitCondition) -> Self
    {
        self.hit_condition = Some(hit_condition);
        self
    }
}

struct LineRecord
{
    file: String,
    line: u32,
    record: Record,
}

impl LineRecord
{
    fn to_breakpoint(&self) -> Breakpoint
    {
        let line = self.record.bindings.iter().find_map(|b| b.line).unwrap_or(self.line);
        self.record.to_breakpoint(
            BreakpointKind::Line,
            BreakpointLocation::Source {
                file: self.file.clone(),
                line,
            },
        )
    }
}

/// Owner of every line breakpoint, grouped by source file.
pub struct LineBreakpoints
{
    runtime: Arc<dyn DebugRuntime>,
    symbols: Arc<dyn SymbolService>,
    just_my_code: AtomicBool,
    files: Mutex<HashMap<String, HashMap<u32, LineRecord>>>,
}

impl LineBreakpoints
{
    pub fn new(runtime: Arc<dyn DebugRuntime>, symbols: Arc<dyn SymbolService>, just_my_code: bool) -> Self
    {
        Self {
            runtime,
            symbols,
            just_my_code: AtomicBool::new(just_my_code),
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_just_my_code(&self, enabled: bool)
    {
        self.just_my_code.store(enabled, Ordering::SeqCst);
    }

    fn files(&self) -> MutexGuard<'_, HashMap<String, HashMap<u32, LineRecord>>>
    {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the line breakpoints of one source file.
    ///
    /// Lines requested again keep their record; other files are untouched.
    /// Results are in request order; a binding failure is returned after
    /// every request was stored.
    pub fn set(&self, file: &str, requests: &[LineBreakpointRequest], ids: &IdAllocator) -> Result<Vec<Breakpoint>>
    {
        let modules = self.runtime.loaded_modules()?;
        let mut files = self.files();
        let mut previous = files.remove(file).unwrap_or_default();
        let mut current: HashMap<u32, LineRecord> = HashMap::with_capacity(requests.len());
        let mut first_error = None;
        let mut results = Vec::with_capacity(requests.len());

        for request in requests {
            if let Some(mut existing) = previous.remove(&request.line) {
                existing.record.update(request.condition.clone(), request.hit_condition);
                current.insert(request.line, existing);
            } else if let Some(existing) = current.get_mut(&request.line) {
                existing.record.update(request.condition.clone(), request.hit_condition);
            } else {
                let id = match ids.allocate() {
                    Ok(id) => id,
                    Err(err) => {
                        first_error.get_or_insert(err);
                        continue;
                    }
                };
                let mut entry = LineRecord {
                    file: file.to_string(),
                    line: request.line,
                    record: Record::new(id, request.condition.clone(), request.hit_condition),
                };
                for module in &modules {
                    keep_first(&mut first_error, self.bind_in_module(&mut entry, &**module));
                }
                tracing::debug!(id = %entry.record.id, file, line = request.line, verified = entry.record.verified(), "line breakpoint added");
                current.insert(request.line, entry);
            }
            if let Some(entry) = current.get(&request.line) {
                results.push(entry.to_breakpoint());
            }
        }

        for (_, mut removed) in previous.drain() {
            keep_first(&mut first_error, removed.record.release_bindings());
        }
        if !current.is_empty() {
            files.insert(file.to_string(), current);
        }
        drop(files);

        first_error.map_or(Ok(results), Err)
    }

    fn bind_in_module(&self, entry: &mut LineRecord, module: &dyn Module) -> Result<()>
    {
        if self.just_my_code.load(Ordering::SeqCst) && !self.symbols.has_symbols(module) {
            return Ok(());
        }
        let ranges = match self.symbols.methods_for_line(module, &entry.file, entry.line)? {
            SymbolLookup::NoSymbols => return Ok(()),
            SymbolLookup::Found(ranges) => ranges,
        };
        entry.record.resolved = true;

        for range in innermost(&ranges) {
            let Some(point) = first_point_at_or_after(range, entry.line) else {
                continue;
            };
            let version = self.runtime.method_version(module, range.method)?;
            if entry.record.has_binding(module.module_id(), range.method, version) {
                continue;
            }
            let binding = Binding::create(self.runtime.as_ref(), module, range.method, point.il_offset, entry.record.enabled)?
                .with_line(point.start_line);
            tracing::trace!(id = %entry.record.id, method = %range.method, il_offset = point.il_offset, "line breakpoint bound");
            entry.record.bindings.push(binding);
        }
        Ok(())
    }
}

/// Ranges with the smallest extent; ties all count.
fn innermost(ranges: &[MethodRange]) -> impl Iterator<Item = &MethodRange>
{
    let smallest = ranges.iter().map(MethodRange::line_span).min();
    ranges.iter().filter(move |r| Some(r.line_span()) == smallest)
}

/// Visible sequence point with the lowest start line not before `line`.
fn first_point_at_or_after(range: &MethodRange, line: u32) -> Option<SequencePoint>
{
    range
        .sequence_points
        .iter()
        .filter(|sp| !sp.is_hidden() && sp.start_line >= line)
        .min_by_key(|sp| (sp.start_line, sp.il_offset))
        .copied()
}

impl KindManager for LineBreakpoints
{
    fn kind(&self) -> BreakpointKind
    {
        BreakpointKind::Line
    }

    fn on_module_loaded(&self, module: &dyn Module) -> Result<Vec<BreakpointEvent>>
    {
        let mut files = self.files();
        let mut events = Vec::new();
        let mut first_error = None;
        for entry in files.values_mut().flat_map(HashMap::values_mut) {
            let before = (entry.record.resolved, entry.record.bindings.len());
            keep_first(&mut first_error, self.bind_in_module(entry, module));
            if before != (entry.record.resolved, entry.record.bindings.len()) {
                events.push(BreakpointEvent {
                    reason: EventReason::Changed,
                    breakpoint: entry.to_breakpoint(),
                });
            }
        }
        first_error.map_or(Ok(events), Err)
    }

    fn on_hot_reload(&self, module: &dyn Module, changed: &[MethodToken]) -> Result<Vec<BreakpointEvent>>
    {
        let mut files = self.files();
        let mut events = Vec::new();
        let mut first_error = None;
        for entry in files.values_mut().flat_map(HashMap::values_mut) {
            let dropped = match entry.record.release_stale(module.module_id(), changed) {
                Ok(dropped) => dropped,
                Err(err) => {
                    first_error.get_or_insert(err);
                    1
                }
            };
            if dropped == 0 {
                continue;
            }
            keep_first(&mut first_error, self.bind_in_module(entry, module));
            events.push(BreakpointEvent {
                reason: EventReason::Changed,
                breakpoint: entry.to_breakpoint(),
            });
        }
        first_error.map_or(Ok(events), Err)
    }

    fn check_hit(&self, native: &dyn NativeBreakpoint) -> Option<HitCandidate>
    {
        let mut files = self.files();
        let entry = files
            .values_mut()
            .flat_map(HashMap::values_mut)
            .find(|e| e.record.owns(native))?;
        if !entry.record.enabled {
            return None;
        }
        entry.record.record_hit();
        Some(HitCandidate {
            breakpoint: entry.to_breakpoint(),
        })
    }

    fn enable(&self, id: BreakpointId, enabled: bool) -> Result<bool>
    {
        let mut files = self.files();
        match files.values_mut().flat_map(HashMap::values_mut).find(|e| e.record.id == id) {
            Some(entry) => entry.record.set_enabled(enabled).map(|()| true),
            None => Ok(false),
        }
    }

    fn enable_all(&self, enabled: bool) -> Result<()>
    {
        let mut first_error = None;
        for entry in self.files().values_mut().flat_map(HashMap::values_mut) {
            keep_first(&mut first_error, entry.record.set_enabled(enabled));
        }
        first_error.map_or(Ok(()), Err)
    }

    fn delete_all(&self) -> Result<()>
    {
        let removed: Vec<_> = self.files().drain().flat_map(|(_, lines)| lines.into_values()).collect();
        release_all(removed.into_iter().flat_map(|mut e| std::mem::take(&mut e.record.bindings)))
    }

    fn snapshot(&self) -> Vec<Breakpoint>
    {
        let mut out: Vec<_> = self
            .files()
            .values()
            .flat_map(HashMap::values)
            .map(LineRecord::to_breakpoint)
            .collect();
        out.sort_by_key(|b| b.id);
        out
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::runtime::mock::{MockRuntime, MockSymbols};
    use crate::symbols::HIDDEN_LINE;

    const FILE: &str = "/src/Program.cs";

    fn sp(start_line: u32, il_offset: u32) -> SequencePoint
    {
        SequencePoint {
            start_line,
            end_line: start_line,
            il_offset,
        }
    }

    fn range(method: u32, start_line: u32, end_line: u32, points: Vec<SequencePoint>) -> MethodRange
    {
        MethodRange {
            method: MethodToken(method),
            start_line,
            end_line,
            sequence_points: points,
        }
    }

    fn setup() -> (Arc<MockRuntime>, Arc<MockSymbols>, LineBreakpoints)
    {
        let runtime = Arc::new(MockRuntime::new());
        let symbols = Arc::new(MockSymbols::new());
        let manager = LineBreakpoints::new(runtime.clone(), symbols.clone(), true);
        (runtime, symbols, manager)
    }

    #[test]
    fn test_first_visible_point_after_line()
    {
        let method = range(1, 10, 20, vec![sp(HIDDEN_LINE, 0), sp(11, 2), sp(14, 8), sp(13, 12)]);
        assert_eq!(first_point_at_or_after(&method, 12), Some(sp(13, 12)));
        assert_eq!(first_point_at_or_after(&method, 11), Some(sp(11, 2)));
        assert_eq!(first_point_at_or_after(&method, 15), None);
    }

    #[test]
    fn test_innermost_range_wins()
    {
        let ranges = vec![range(1, 1, 50, Vec::new()), range(2, 10, 20, Vec::new()), range(3, 10, 20, Vec::new())];
        let methods: Vec<_> = innermost(&ranges).map(|r| r.method).collect();
        assert_eq!(methods, vec![MethodToken(2), MethodToken(3)]);
    }

    #[test]
    fn test_bind_on_load_and_report_line()
    {
        let (runtime, symbols, manager) = setup();
        let ids = IdAllocator::new();
        let result = manager.set(FILE, &[LineBreakpointRequest::new(12)], &ids).unwrap();
        assert!(!result[0].verified);

        let app = runtime.load_module("App.dll");
        symbols.set_range("App.dll", FILE, range(0x0600_0001, 10, 20, vec![sp(11, 0), sp(13, 6)]));
        let events = manager.on_module_loaded(&*app).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].breakpoint.location,
            BreakpointLocation::Source {
                file: FILE.to_string(),
                line: 13
            }
        );
        assert!(runtime.active_breakpoint_at(app.id(), 0x0600_0001, 6).is_some());
    }

    #[test]
    fn test_other_files_untouched()
    {
        let (_runtime, _symbols, manager) = setup();
        let ids = IdAllocator::new();
        manager.set("/src/A.cs", &[LineBreakpointRequest::new(1)], &ids).unwrap();
        manager.set("/src/B.cs", &[LineBreakpointRequest::new(2)], &ids).unwrap();
        manager.set("/src/A.cs", &[], &ids).unwrap();
        let all = manager.snapshot();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, BreakpointId::from_raw(2));
    }

    #[test]
    fn test_hit_counts_survive_resend()
    {
        let (runtime, symbols, manager) = setup();
        let app = runtime.load_module("App.dll");
        symbols.set_range("App.dll", FILE, range(0x0600_0001, 10, 20, vec![sp(12, 4)]));
        let ids = IdAllocator::new();
        manager.set(FILE, &[LineBreakpointRequest::new(12)], &ids).unwrap();

        let native = runtime.active_breakpoint_at(app.id(), 0x0600_0001, 4).unwrap();
        let hit = manager.check_hit(&*native).unwrap();
        assert_eq!(hit.breakpoint.hit_count, 1);

        let again = manager.set(FILE, &[LineBreakpointRequest::new(12).condition("i == 3")], &ids).unwrap();
        assert_eq!(again[0].hit_count, 1);
        assert_eq!(again[0].id, hit.breakpoint.id);
    }
}
