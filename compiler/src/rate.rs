// rate.rs — Per-domain rate tracking and rate-guard multiplexing
//
// A stream runs at its domain's default rate until a member declares a
// different one. From that member on, code is wrapped in a counter guard:
// decimation (`if`) when the rate drops, interpolation (`while`) when it
// rises. Each domain keeps its own current rate and its own LIFO stack of
// open guards; guards close innermost first when the stream ends.
//
// Preconditions: rates handed in are positive; non-positive rates mean
//                "no rate of its own" and never open a guard.
// Postconditions: every opened guard has exactly one counter declaration
//                 whose init code primes the counter.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;

use crate::code::Declaration;
use crate::templates::Templates;

// ── Transitions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// Rate drops: run the body on some ticks only.
    Decimation,
    /// Rate rises: run the body several times per tick.
    Interpolation,
}

/// A rate change at one stream position.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub domain: String,
    pub from: f64,
    pub to: f64,
}

impl Transition {
    pub fn kind(&self) -> GuardKind {
        if self.to < self.from {
            GuardKind::Decimation
        } else {
            GuardKind::Interpolation
        }
    }

    /// Counter increment per tick: `to/from` when decimating, `from/to`
    /// per body execution when interpolating. Always in (0, 1).
    pub fn increment(&self) -> f64 {
        match self.kind() {
            GuardKind::Decimation => self.to / self.from,
            GuardKind::Interpolation => self.from / self.to,
        }
    }

    /// Counter declaration with its priming init code.
    pub fn counter_declaration(
        &self,
        t: &dyn Templates,
        counter: &str,
        stack_index: usize,
    ) -> Declaration {
        let initial = match self.kind() {
            GuardKind::Decimation => t.number(1.0),
            GuardKind::Interpolation => t.number(0.0),
        };
        Declaration::new(
            counter,
            stack_index,
            Some(self.domain.clone()),
            t.variable_declaration(t.counter_type(), counter, None),
        )
        .with_init(t.assignment(counter, &initial))
    }
}

// ── Rate tracking ───────────────────────────────────────────────────────────

/// Current rate of every domain a stream touches.
#[derive(Debug, Clone, Default)]
pub struct RateTracker {
    current: BTreeMap<String, f64>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a domain's rate unless the stream already moved it.
    pub fn seed(&mut self, domain: &str, rate: Option<f64>) {
        if let Some(rate) = rate.filter(|r| *r > 0.0) {
            self.current.entry(domain.to_string()).or_insert(rate);
        }
    }

    pub fn current(&self, domain: &str) -> Option<f64> {
        self.current.get(domain).copied()
    }

    /// Feed the rate of the next atom in `domain`. Returns the transition
    /// when it differs from the current rate; a domain without a rate yet
    /// simply adopts it.
    pub fn advance(&mut self, domain: &str, rate: f64) -> Option<Transition> {
        if rate <= 0.0 {
            return None;
        }
        match self.current.insert(domain.to_string(), rate) {
            Some(from) if from != rate => Some(Transition {
                domain: domain.to_string(),
                from,
                to: rate,
            }),
            _ => None,
        }
    }
}

// ── Multiplexer ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Region {
    counter: String,
    kind: GuardKind,
    increment: f64,
    code: String,
}

#[derive(Debug, Default)]
struct Lane {
    base: String,
    open: Vec<Region>,
}

impl Lane {
    fn top(&mut self) -> &mut String {
        match self.open.last_mut() {
            Some(region) => &mut region.code,
            None => &mut self.base,
        }
    }
}

/// Collects one stream's processing code per domain, wrapping code emitted
/// after a transition in that transition's guard.
#[derive(Debug, Default)]
pub struct RateMultiplexer {
    lanes: BTreeMap<String, Lane>,
}

impl RateMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a guard in the transition's domain. Subsequent code for that
    /// domain lands inside it.
    pub fn open(&mut self, transition: &Transition, counter: impl Into<String>) {
        let counter = counter.into();
        log::debug!(
            "rate guard {} in {}: {} -> {} ({:?})",
            counter,
            transition.domain,
            transition.from,
            transition.to,
            transition.kind()
        );
        self.lanes
            .entry(transition.domain.clone())
            .or_default()
            .open
            .push(Region {
                counter,
                kind: transition.kind(),
                increment: transition.increment(),
                code: String::new(),
            });
    }

    pub fn emit(&mut self, domain: &str, code: &str) {
        if code.is_empty() {
            return;
        }
        self.lanes
            .entry(domain.to_string())
            .or_default()
            .top()
            .push_str(code);
    }

    /// Close every open guard innermost first and return the code of each
    /// domain in domain order.
    pub fn finish(self, t: &dyn Templates) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (domain, mut lane) in self.lanes {
            while let Some(region) = lane.open.pop() {
                let wrapped = match region.kind {
                    GuardKind::Decimation => {
                        t.decimation_guard(&region.counter, &region.code, region.increment)
                    }
                    GuardKind::Interpolation => {
                        t.interpolation_guard(&region.counter, &region.code, region.increment)
                    }
                };
                lane.top().push_str(&wrapped);
            }
            out.insert(domain, lane.base);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::RATE_INHERIT;
    use crate::templates::CppTemplates;

    #[test]
    fn tracker_reports_changes_only() {
        let mut tr = RateTracker::new();
        tr.seed("Audio", Some(44100.0));
        assert_eq!(tr.advance("Audio", 44100.0), None);
        assert_eq!(tr.advance("Audio", RATE_INHERIT), None);
        let change = tr.advance("Audio", 22050.0).unwrap();
        assert_eq!(change.kind(), GuardKind::Decimation);
        assert_eq!(change.increment(), 0.5);
        assert_eq!(tr.current("Audio"), Some(22050.0));
    }

    #[test]
    fn unseeded_domain_adopts_first_rate() {
        let mut tr = RateTracker::new();
        assert_eq!(tr.advance("Control", 100.0), None);
        assert_eq!(tr.current("Control"), Some(100.0));
        let up = tr.advance("Control", 400.0).unwrap();
        assert_eq!(up.kind(), GuardKind::Interpolation);
        assert_eq!(up.increment(), 0.25);
    }

    #[test]
    fn seeding_does_not_override_a_moved_rate() {
        let mut tr = RateTracker::new();
        tr.seed("Audio", Some(48000.0));
        tr.advance("Audio", 24000.0);
        tr.seed("Audio", Some(48000.0));
        assert_eq!(tr.current("Audio"), Some(24000.0));
    }

    #[test]
    fn code_after_open_is_wrapped() {
        let t = CppTemplates::new();
        let mut mux = RateMultiplexer::new();
        mux.emit("Audio", "a = x;\n");
        mux.open(
            &Transition {
                domain: "Audio".into(),
                from: 44100.0,
                to: 22050.0,
            },
            "rc",
        );
        mux.emit("Audio", "b = a;\n");
        mux.emit("Control", "k = 1;\n");
        let out = mux.finish(&t);
        assert_eq!(
            out["Audio"],
            "a = x;\nif (rc >= 1.0) {\n    rc -= 1.0;\n    b = a;\n}\nrc += 0.50000000;\n"
        );
        assert_eq!(out["Control"], "k = 1;\n");
    }

    #[test]
    fn nested_guards_close_innermost_first() {
        let t = CppTemplates::new();
        let mut mux = RateMultiplexer::new();
        mux.open(
            &Transition {
                domain: "Audio".into(),
                from: 4.0,
                to: 2.0,
            },
            "outer",
        );
        mux.emit("Audio", "b;\n");
        mux.open(
            &Transition {
                domain: "Audio".into(),
                from: 2.0,
                to: 4.0,
            },
            "inner",
        );
        mux.emit("Audio", "c;\n");
        let out = mux.finish(&t);
        let audio = &out["Audio"];
        let outer = audio.find("if (outer >= 1.0)").unwrap();
        let inner = audio.find("while (inner < 1.0)").unwrap();
        assert!(outer < inner);
        assert!(audio.trim_end().ends_with("outer += 0.50000000;"));
    }

    #[test]
    fn counter_declaration_primes_by_kind() {
        let t = CppTemplates::new();
        let down = Transition {
            domain: "Audio".into(),
            from: 2.0,
            to: 1.0,
        };
        let d = down.counter_declaration(&t, "_Audio_rc_0", 0);
        assert_eq!(d.code, "double _Audio_rc_0;\n");
        assert_eq!(d.init_code, "_Audio_rc_0 = 1.00000000;\n");
        assert_eq!(d.domain.as_deref(), Some("Audio"));

        let up = Transition {
            domain: "Audio".into(),
            from: 1.0,
            to: 2.0,
        };
        assert_eq!(
            up.counter_declaration(&t, "c", 0).init_code,
            "c = 0.00000000;\n"
        );
    }
}
