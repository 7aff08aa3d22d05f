//! Contract scenarios run against the shadow backend.
//!
//! Each scenario drives one observable property of the tagging primitives
//! (codec round trips, exclusion, region coverage, the double-granule split,
//! the alignment and tag policies) under a chosen [`MteConfig`] and reports
//! pass, fail or skip. A run never needs MTE hardware.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use std::time::Instant;

use mtekit::{
    AlignmentChecks, ExcludeMask, MAX_TAG, MteConfig, MteError, ShadowTagMemory, TAG_SHIFT,
    TagBackend, TagOp, Tagger, get_tag, set_tag_with, strip_tag,
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome, StreamKind};

const ARENA_LEN: usize = 256;

#[repr(C, align(32))]
struct Arena([u8; ARENA_LEN]);

impl Arena {
    fn filled(byte: u8) -> Box<Self> {
        Box::new(Self([byte; ARENA_LEN]))
    }

    fn base(&mut self) -> *mut u8 {
        self.0.as_mut_ptr()
    }
}

/// Why a scenario failed.
#[derive(Debug, Error)]
pub enum ScenarioFailure {
    #[error("{what}: expected {expected}, got {actual}")]
    Mismatch {
        what: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Tag(#[from] MteError),
    #[error("expected a panic containing '{expected}', operation completed")]
    NoPanic { expected: &'static str },
    #[error("panicked: {0}")]
    Panicked(String),
}

fn mismatch(
    what: impl Into<String>,
    expected: impl std::fmt::Debug,
    actual: impl std::fmt::Debug,
) -> ScenarioFailure {
    ScenarioFailure::Mismatch {
        what: what.into(),
        expected: format!("{expected:?}"),
        actual: format!("{actual:?}"),
    }
}

fn ensure_eq<T: PartialEq + std::fmt::Debug>(
    what: impl FnOnce() -> String,
    expected: T,
    actual: T,
) -> Result<(), ScenarioFailure> {
    if expected == actual {
        Ok(())
    } else {
        Err(mismatch(what(), expected, actual))
    }
}

/// How a scenario that did not fail ended.
enum Step {
    Pass(Value),
    Skip(&'static str),
}

type ScenarioFn = fn(&ScenarioOptions) -> Result<Step, ScenarioFailure>;

const SCENARIOS: &[(&str, ScenarioFn)] = &[
    ("codec_round_trip", codec_round_trip),
    ("exclude_mask_round_trip", exclude_mask_round_trip),
    ("exclude_ptr_tag_single_bit", exclude_ptr_tag_single_bit),
    ("random_tag_respects_exclusion", random_tag_respects_exclusion),
    ("random_tag_all_excluded", random_tag_all_excluded),
    ("tag_region_exact_coverage", tag_region_exact_coverage),
    ("tag_and_zero_reads_zero", tag_and_zero_reads_zero),
    ("tag_and_copy_matches_source", tag_and_copy_matches_source),
    ("double_granule_split", double_granule_split),
    ("zero_size_is_no_op", zero_size_is_no_op),
    ("invalid_tag_policy", invalid_tag_policy),
    ("misaligned_tag_region_policy", misaligned_tag_region_policy),
    ("misaligned_zeroing_policy", misaligned_zeroing_policy),
];

/// Names of every scenario, in run order.
pub fn scenario_names() -> impl Iterator<Item = &'static str> {
    SCENARIOS.iter().map(|(name, _)| *name)
}

/// Options for one scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioOptions {
    pub config: MteConfig,
    /// Draws per excluded tag in the random-tag scenario.
    pub iterations: u32,
    /// Seed for the shadow backend's generator.
    pub seed: u64,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            config: MteConfig::BUILD,
            iterations: 1000,
            seed: 0x5EED,
        }
    }
}

impl ScenarioOptions {
    /// Alignment level from a command-line value; `None` keeps the build's level.
    pub fn alignment_from_arg(raw: Option<&str>) -> Result<AlignmentChecks, String> {
        match raw {
            None => Ok(MteConfig::BUILD.alignment),
            Some(s) => AlignmentChecks::parse(s).ok_or_else(|| {
                format!("Unsupported alignment level '{s}' (expected full, relaxed or off)")
            }),
        }
    }

    fn tagger(&self) -> Tagger<ShadowTagMemory> {
        Tagger::with_config(
            ShadowTagMemory::with_seed(self.seed).with_trace(),
            self.config,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: &'static str,
    pub outcome: Outcome,
    pub latency_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub backend: &'static str,
    pub alignment: &'static str,
    pub tag_checks: bool,
    pub double_granule: bool,
    pub iterations: u32,
    pub seed: u64,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<ScenarioResult>,
}

impl ScenarioReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    #[must_use]
    pub fn result(&self, name: &str) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Log one start line, one line per scenario and one summary line.
    pub fn emit_to<W: std::io::Write>(&self, emitter: &mut LogEmitter<W>) -> std::io::Result<()> {
        let base = |level, event: &str| {
            LogEntry::new("", level, event)
                .with_stream(StreamKind::Scenario)
                .with_mode(self.alignment)
                .with_backend(self.backend)
        };
        emitter.emit_entry(base(LogLevel::Info, "scenario_run_start").with_details(json!({
            "tag_checks": self.tag_checks,
            "double_granule": self.double_granule,
            "iterations": self.iterations,
            "seed": self.seed,
        })))?;
        for result in &self.results {
            let level = match result.outcome {
                Outcome::Fail => LogLevel::Error,
                Outcome::Skip => LogLevel::Warn,
                Outcome::Pass => LogLevel::Info,
            };
            let mut entry = base(level, "scenario_result")
                .with_scenario(result.name)
                .with_outcome(result.outcome)
                .with_latency_ns(result.latency_ns);
            let mut details = result.details.clone();
            if let Some(message) = &result.message {
                details = json!({ "message": message, "details": details });
            }
            if !details.is_null() {
                entry = entry.with_details(details);
            }
            emitter.emit_entry(entry)?;
        }
        let level = if self.all_passed() {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        emitter.emit_entry(base(level, "scenario_run_end").with_details(json!({
            "passed": self.passed,
            "failed": self.failed,
            "skipped": self.skipped,
        })))?;
        emitter.flush()
    }
}

/// Run every scenario under `options`.
#[must_use]
pub fn run_all(options: &ScenarioOptions) -> ScenarioReport {
    let mut report = ScenarioReport {
        backend: ShadowTagMemory::NAME,
        alignment: options.config.alignment.as_str(),
        tag_checks: options.config.tag_checks,
        double_granule: options.config.double_granule,
        iterations: options.iterations,
        seed: options.seed,
        passed: 0,
        failed: 0,
        skipped: 0,
        results: Vec::with_capacity(SCENARIOS.len()),
    };
    for &(name, scenario) in SCENARIOS {
        let result = run_one(name, scenario, options);
        match result.outcome {
            Outcome::Pass => report.passed += 1,
            Outcome::Fail => report.failed += 1,
            Outcome::Skip => report.skipped += 1,
        }
        report.results.push(result);
    }
    report
}

fn run_one(name: &'static str, scenario: ScenarioFn, options: &ScenarioOptions) -> ScenarioResult {
    let started = Instant::now();
    let step = catch_panic(|| scenario(options))
        .map_err(ScenarioFailure::Panicked)
        .and_then(|r| r);
    let latency_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
    let (outcome, message, details) = match step {
        Ok(Step::Pass(details)) => (Outcome::Pass, None, details),
        Ok(Step::Skip(reason)) => (Outcome::Skip, Some(reason.to_string()), Value::Null),
        Err(failure) => (Outcome::Fail, Some(failure.to_string()), Value::Null),
    };
    ScenarioResult {
        name,
        outcome,
        latency_ns,
        message,
        details,
    }
}

thread_local! {
    static MUTED: Cell<bool> = const { Cell::new(false) };
}

/// Wrap the current panic hook once so it can be silenced per thread.
fn install_muting_hook() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !MUTED.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// Run `f`, turning a panic into its message. Expected panics do not
/// reach stderr.
fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    install_muting_hook();
    let was_muted = MUTED.with(|m| m.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    MUTED.with(|m| m.set(was_muted));
    result.map_err(|payload| {
        payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_string()))
            .unwrap_or_else(|| "non-string panic payload".to_string())
    })
}

/// Expect `f` to panic with a message containing `needle`, and return the
/// kind of violation it reported.
fn expect_panic(needle: &'static str, f: impl FnOnce()) -> Result<&'static str, ScenarioFailure> {
    match catch_panic(f) {
        Ok(()) => Err(ScenarioFailure::NoPanic { expected: needle }),
        Err(message) if message.contains(needle) => Ok(violation_kind(&message)),
        Err(message) => Err(mismatch("panic message", needle, message)),
    }
}

/// Address-free name of the violation in a panic message, so reports stay
/// identical across runs.
fn violation_kind(message: &str) -> &'static str {
    const KINDS: [&str; 5] = [
        "invalid tag",
        "misaligned pointer",
        "misaligned size",
        "overflows the address space",
        ALIGNMENT_FAULT,
    ];
    KINDS
        .into_iter()
        .find(|kind| message.contains(kind))
        .unwrap_or("other")
}

const CONTRACT_VIOLATION: &str = "MTE contract violation";
const ALIGNMENT_FAULT: &str = "alignment fault";

const SAMPLE_ADDRS: [usize; 5] = [
    0,
    0x1000,
    0x0000_7fff_ffff_fff0,
    0x00ff_ffff_ffff_ffff,
    0xf0f0_0000_dead_bee0,
];

fn all_tags() -> impl Iterator<Item = u8> {
    0..=MAX_TAG
}

fn codec_round_trip(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let field = usize::from(MAX_TAG) << TAG_SHIFT;
    let mut checked = 0u32;
    for addr in SAMPLE_ADDRS {
        for tag in all_tags() {
            let tagged = set_tag_with(options.config, addr, tag);
            ensure_eq(|| format!("get_tag(set_tag({addr:#x}, {tag}))"), tag, get_tag(tagged))?;
            ensure_eq(
                || format!("bits outside the tag field of {addr:#x}"),
                addr & !field,
                tagged & !field,
            )?;
            ensure_eq(
                || format!("strip_tag({tagged:#x})"),
                addr & !field,
                strip_tag(tagged),
            )?;
            checked += 1;
        }
    }
    Ok(Step::Pass(json!({ "checked": checked })))
}

fn exclude_mask_round_trip(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let t = options.tagger();
    let masks = [0x0000, 0x0001, 0x8000, 0xA5A5, 0xFFFE, 0xFFFF].map(ExcludeMask::from_bits);
    for mask in masks {
        for tag in all_tags() {
            let with = t.exclude_add_tag(mask, tag);
            if !with.contains(tag) {
                return Err(mismatch(format!("{mask:?} + {tag} contains {tag}"), true, false));
            }
            let without = t.exclude_remove_tag(with, tag);
            ensure_eq(
                || format!("remove({tag}) after add({tag}) on {mask:?}"),
                mask.bits() & !(1 << tag),
                without.bits(),
            )?;
            ensure_eq(
                || format!("add({tag}) leaves other bits of {mask:?}"),
                mask.bits() | (1 << tag),
                with.bits(),
            )?;
        }
    }
    Ok(Step::Pass(json!({ "masks": masks.len() })))
}

fn exclude_ptr_tag_single_bit(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let t = options.tagger();
    for tag in all_tags() {
        let ptr = t.set_tag(0x4000usize, tag);
        let mask = t.exclude_add_ptr_tag(ExcludeMask::EMPTY, ptr);
        ensure_eq(|| format!("GMI of tag {tag}"), 1u64 << tag, mask.bits())?;
        ensure_eq(
            || format!("GMI of tag {tag} matches the software form"),
            ExcludeMask::EMPTY.add_ptr_tag(ptr),
            mask,
        )?;
    }
    Ok(Step::Pass(Value::Null))
}

fn random_tag_respects_exclusion(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    if options.iterations == 0 {
        return Ok(Step::Skip("no draws requested"));
    }
    let t = options.tagger();
    let base = 0x0000_1234_5678_9ab0usize;
    let mut seen = [0u32; 16];
    for excluded in all_tags() {
        let mask = ExcludeMask::EMPTY.add_tag_with(options.config, excluded);
        for _ in 0..options.iterations {
            let tagged = t.set_random_tag(base, mask);
            let tag = get_tag(tagged);
            if tag == excluded {
                return Err(mismatch(
                    format!("random tag with {excluded} excluded"),
                    format!("anything but {excluded}"),
                    tag,
                ));
            }
            ensure_eq(|| "address bits after IRG".to_string(), base, strip_tag(tagged))?;
            seen[usize::from(tag)] += 1;
        }
    }
    if options.iterations >= 200
        && let Some(tag) = seen.iter().position(|&n| n == 0)
    {
        return Err(mismatch(format!("draws of tag {tag}"), "at least one", 0));
    }
    Ok(Step::Pass(json!({ "histogram": seen })))
}

fn random_tag_all_excluded(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let t = options.tagger();
    let ptr = t.set_tag(0x8000usize, 9);
    let tagged = t.set_random_tag(ptr, ExcludeMask::ALL);
    ensure_eq(|| "tag with every tag excluded".to_string(), 0, get_tag(tagged))?;
    ensure_eq(|| "address bits".to_string(), 0x8000, strip_tag(tagged))?;
    Ok(Step::Pass(Value::Null))
}

fn tag_region_exact_coverage(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let mut arena = Arena::filled(0x11);
    let t = options.tagger();
    let base = arena.base();
    let ptr = t.set_tag(base.wrapping_add(32), 0xC);
    // SAFETY: shadow backend; [32, 128) lies inside the arena.
    unsafe { t.tag_region(ptr, 96) };
    let tags = t.backend().tags_in(base, ARENA_LEN);
    for (granule, &tag) in tags.iter().enumerate() {
        let expected = if (2..8).contains(&granule) { 0xC } else { 0 };
        ensure_eq(|| format!("tag of granule {granule}"), expected, tag)?;
    }
    if arena.0.iter().any(|&b| b != 0x11) {
        return Err(mismatch("payload after tag_region", "untouched", "modified"));
    }
    t.backend().check_access(ptr, 96)?;
    Ok(Step::Pass(json!({ "granules": 6 })))
}

fn tag_and_zero_reads_zero(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let mut arena = Arena::filled(0xEE);
    let t = options.tagger();
    let base = arena.base();
    let mut sizes = Vec::new();
    for size in (16..=160).step_by(16) {
        arena.0.fill(0xEE);
        let ptr = t.set_tag(base, 5);
        // SAFETY: shadow backend; the arena is writable for `size` bytes.
        unsafe { t.tag_and_zero_region(ptr, size) };
        if let Some(i) = arena.0[..size].iter().position(|&b| b != 0) {
            return Err(mismatch(format!("byte {i} after zeroing {size}"), 0u8, arena.0[i]));
        }
        if arena.0[size..].iter().any(|&b| b != 0xEE) {
            return Err(mismatch(format!("bytes past {size}"), "untouched", "modified"));
        }
        t.backend().check_access(ptr, size)?;
        sizes.push(size);
    }
    Ok(Step::Pass(json!({ "sizes": sizes })))
}

fn tag_and_copy_matches_source(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let mut dst = Arena::filled(0);
    let src: Vec<u8> = (0..=ARENA_LEN).map(|i| (i * 7 + 3) as u8).collect();
    let t = options.tagger();
    let size = 128;
    for offset in [0, 1, 5] {
        dst.0.fill(0);
        let ptr = t.set_tag(dst.base(), 0xA);
        // SAFETY: shadow backend; `src` holds `offset + size` readable bytes
        // and does not overlap the arena.
        unsafe { t.tag_and_copy_region(ptr, src.as_ptr().wrapping_add(offset), size) };
        ensure_eq(
            || format!("copied bytes from source offset {offset}"),
            &src[offset..offset + size],
            &dst.0[..size],
        )?;
        t.backend().check_access(ptr, size)?;
        let stgp = t
            .backend()
            .take_trace()
            .iter()
            .filter(|op| matches!(op, TagOp::Stgp { tag: 0xA, .. }))
            .count();
        ensure_eq(|| "STGP count".to_string(), size / 16, stgp)?;
    }
    Ok(Step::Pass(json!({ "size": size })))
}

fn double_granule_split(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let mut arena = Arena::filled(0);
    let t = options.tagger();
    let ptr = t.set_tag(arena.base(), 7);
    let addr = strip_tag(ptr).addr();
    // SAFETY: shadow backend; 48 bytes lie inside the arena.
    unsafe { t.tag_region(ptr, 48) };
    let trace = t.backend().take_trace();
    let expected = if t.uses_double_granule() {
        vec![
            TagOp::Stg { addr, tag: 7 },
            TagOp::St2g { addr: addr + 16, tag: 7 },
        ]
    } else {
        vec![
            TagOp::Stg { addr, tag: 7 },
            TagOp::Stg { addr: addr + 16, tag: 7 },
            TagOp::Stg { addr: addr + 32, tag: 7 },
        ]
    };
    ensure_eq(|| "instructions for a 48-byte region".to_string(), &expected, &trace)?;
    Ok(Step::Pass(json!({
        "double_granule": t.uses_double_granule(),
        "stores": trace.len(),
    })))
}

fn zero_size_is_no_op(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let mut arena = Arena::filled(0x5A);
    let src = [1u8; 16];
    let t = options.tagger();
    let ptr = t.set_tag(arena.base(), 3);
    // SAFETY: shadow backend; a zero-length region touches nothing.
    unsafe {
        t.tag_region(ptr, 0);
        t.tag_and_zero_region(ptr, 0);
        t.tag_and_copy_region(ptr, src.as_ptr(), 0);
    }
    ensure_eq(|| "stores for size 0".to_string(), 0, t.backend().trace().len())?;
    ensure_eq(|| "tagged granules".to_string(), 0, t.backend().granule_count())?;
    if arena.0.iter().any(|&b| b != 0x5A) {
        return Err(mismatch("payload after size 0", "untouched", "modified"));
    }
    Ok(Step::Pass(Value::Null))
}

fn invalid_tag_policy(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let config = options.config;
    if config.tag_checks {
        let violation = expect_panic(CONTRACT_VIOLATION, || {
            let _ = set_tag_with(config, 0x1000usize, MAX_TAG + 1);
        })?;
        expect_panic(CONTRACT_VIOLATION, || {
            let _ = ExcludeMask::EMPTY.add_tag_with(config, 0x20);
        })?;
        Ok(Step::Pass(json!({ "policy": "abort", "violation": violation })))
    } else {
        for raw in MAX_TAG + 1..=u8::MAX {
            let tagged = set_tag_with(config, 0x1000usize, raw);
            ensure_eq(|| format!("tag stored for {raw}"), raw & MAX_TAG, get_tag(tagged))?;
        }
        ensure_eq(
            || "exclude 16 without checks".to_string(),
            ExcludeMask::EMPTY.add_tag_with(config, 0),
            ExcludeMask::EMPTY.add_tag_with(config, 16),
        )?;
        Ok(Step::Pass(json!({ "policy": "low_nibble" })))
    }
}

fn misaligned_tag_region_policy(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let mut arena = Arena::filled(0);
    let t = options.tagger();
    let base = arena.base();
    let ptr = t.set_tag(base.wrapping_add(8), 4);
    if options.config.alignment.enforces_advisory() {
        let violation = expect_panic(CONTRACT_VIOLATION, || {
            // SAFETY: shadow backend; rejected before any store.
            unsafe { t.tag_region(ptr, 16) };
        })?;
        ensure_eq(|| "granules tagged".to_string(), 0, t.backend().granule_count())?;
        return Ok(Step::Pass(json!({ "policy": "abort", "violation": violation })));
    }
    // SAFETY: shadow backend; the widened region [0, 32) lies in the arena.
    unsafe { t.tag_region(ptr, 16) };
    ensure_eq(
        || "tags of the widened region".to_string(),
        vec![4, 4, 0],
        t.backend().tags_in(base, 48),
    )?;
    Ok(Step::Pass(json!({ "policy": "widen" })))
}

fn misaligned_zeroing_policy(options: &ScenarioOptions) -> Result<Step, ScenarioFailure> {
    let mut arena = Arena::filled(0x77);
    let t = options.tagger();
    let ptr = t.set_tag(arena.base().wrapping_add(8), 6);
    let (needle, policy) = match options.config.alignment {
        AlignmentChecks::Full | AlignmentChecks::Relaxed => (CONTRACT_VIOLATION, "abort"),
        AlignmentChecks::Off => (ALIGNMENT_FAULT, "fault"),
    };
    let violation = expect_panic(needle, || {
        // SAFETY: shadow backend; either the contract check or the emulated
        // instruction rejects the pointer before any byte is written.
        unsafe { t.tag_and_zero_region(ptr, 32) };
    })?;
    if arena.0.iter().any(|&b| b != 0x77) {
        return Err(mismatch("payload after rejected zeroing", "untouched", "modified"));
    }
    Ok(Step::Pass(json!({ "policy": policy, "violation": violation })))
}
