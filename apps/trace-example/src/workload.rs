//! The fixed call tree that gets profiled.
//!
//! ```text
//! outer_function
//! ├── middle_function_a
//! │   ├── inner_function_a1  (small)
//! │   └── inner_function_a2  (medium)
//! └── middle_function_b
//!     └── inner_function_b1  (large)
//! ```
//!
//! `outer_function` runs `{a, pause, b}` three times and then `a` twice. The
//! function names match the node names so they show up unchanged in the
//! profile.

use std::fmt;
use std::hint::black_box;
use std::time::Duration;

use crate::config::WorkloadSettings;

/// Relative cost of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostClass {
    Small,
    Medium,
    Large,
}

impl CostClass {
    /// Cost relative to [`CostClass::Small`].
    pub const fn multiplier(self) -> u64 {
        match self {
            Self::Small => 1,
            Self::Medium => 5,
            Self::Large => 10,
        }
    }

    pub const fn iterations(self, small_iterations: u64) -> u64 {
        small_iterations.saturating_mul(self.multiplier())
    }
}

impl fmt::Display for CostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small => f.write_str("small"),
            Self::Medium => f.write_str("medium"),
            Self::Large => f.write_str("large"),
        }
    }
}

/// A named unit of work in the call tree.
///
/// Only leaves carry a cost; inner nodes just call their children.
#[derive(Debug, PartialEq, Eq)]
pub struct CallNode {
    pub name: &'static str,
    pub cost: Option<CostClass>,
    pub children: &'static [CallNode],
}

impl CallNode {
    const fn leaf(name: &'static str, cost: CostClass) -> Self {
        Self {
            name,
            cost: Some(cost),
            children: &[],
        }
    }

    /// Number of nodes on the longest path from this node to a leaf.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(CallNode::depth).max().unwrap_or(0)
    }

    pub fn find(&self, name: &str) -> Option<&CallNode> {
        if self.name == name {
            return Some(self);
        }

        self.children.iter().find_map(|child| child.find(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}

const INNER_A1: CallNode = CallNode::leaf("inner_function_a1", CostClass::Small);
const INNER_A2: CallNode = CallNode::leaf("inner_function_a2", CostClass::Medium);
const INNER_B1: CallNode = CallNode::leaf("inner_function_b1", CostClass::Large);

const MIDDLE_A: CallNode = CallNode {
    name: "middle_function_a",
    cost: None,
    children: &[INNER_A1, INNER_A2],
};

const MIDDLE_B: CallNode = CallNode {
    name: "middle_function_b",
    cost: None,
    children: &[INNER_B1],
};

pub static CALL_TREE: CallNode = CallNode {
    name: "outer_function",
    cost: None,
    children: &[MIDDLE_A, MIDDLE_B],
};

/// One observable step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Leaf { name: &'static str, cost: CostClass },
    Pause(Duration),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf { name, cost } => write!(f, "{name} ({cost})"),
            Self::Pause(duration) => write!(f, "pause {duration:?}"),
        }
    }
}

/// Receives every step the workload takes, in order.
pub trait WorkloadObserver {
    fn on_step(&mut self, step: Step);
}

/// Logs every step at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceObserver;

impl WorkloadObserver for TraceObserver {
    fn on_step(&mut self, step: Step) {
        tracing::trace!(%step, "workload step");
    }
}

impl WorkloadObserver for Vec<Step> {
    fn on_step(&mut self, step: Step) {
        self.push(step);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    small_iterations: u64,
    pause: Duration,
}

impl Workload {
    /// Number of `{a, pause, b}` rounds.
    pub const ROUNDS: usize = 3;
    /// Number of trailing `a` calls.
    pub const TRAILING: usize = 2;

    pub fn new(settings: &WorkloadSettings) -> Self {
        Self {
            small_iterations: settings.small_iterations,
            pause: settings.pause,
        }
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    /// Run the call tree, logging each step at trace level.
    pub fn run_outer(&self) {
        self.run_observed(&mut TraceObserver);
    }

    pub fn run_observed(&self, observer: &mut dyn WorkloadObserver) {
        outer_function(self, observer);
    }

    fn leaf(&self, node: &CallNode, observer: &mut dyn WorkloadObserver, f: fn(u64) -> u64) {
        let Some(cost) = node.cost else {
            return;
        };

        observer.on_step(Step::Leaf { name: node.name, cost });
        black_box(f(cost.iterations(self.small_iterations)));
    }

    fn sleep(&self, observer: &mut dyn WorkloadObserver) {
        observer.on_step(Step::Pause(self.pause));
        std::thread::sleep(self.pause);
    }
}

#[inline(never)]
fn outer_function(workload: &Workload, observer: &mut dyn WorkloadObserver) {
    tracing::info!("outer function started");

    for _ in 0..Workload::ROUNDS {
        middle_function_a(workload, observer);
        // Off-cpu time: the thread is parked, so no samples are taken.
        workload.sleep(observer);
        middle_function_b(workload, observer);
    }

    for _ in 0..Workload::TRAILING {
        middle_function_a(workload, observer);
    }

    tracing::info!("outer function finished");
}

#[inline(never)]
fn middle_function_a(workload: &Workload, observer: &mut dyn WorkloadObserver) {
    workload.leaf(&INNER_A1, observer, inner_function_a1);
    workload.leaf(&INNER_A2, observer, inner_function_a2);
}

#[inline(never)]
fn middle_function_b(workload: &Workload, observer: &mut dyn WorkloadObserver) {
    workload.leaf(&INNER_B1, observer, inner_function_b1);
}

#[inline(never)]
fn inner_function_a1(iterations: u64) -> u64 {
    spin(iterations)
}

#[inline(never)]
fn inner_function_a2(iterations: u64) -> u64 {
    spin(iterations)
}

#[inline(never)]
fn inner_function_b1(iterations: u64) -> u64 {
    spin(iterations)
}

#[inline(always)]
fn spin(iterations: u64) -> u64 {
    let mut acc = 0u64;
    for i in 0..iterations {
        acc = acc.wrapping_add(black_box(i).wrapping_mul(i));
    }
    acc
}
