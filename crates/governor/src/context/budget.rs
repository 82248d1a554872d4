//! Per-turn token accounting.
//!
//! A [`TokenBudget`] is created once per turn, owned by that turn alone, and
//! dropped with it. The output reservation is carved out up front and can
//! never be handed to a prompt section.
//!
//! Two quantities are tracked per section:
//!
//! - **allocated**: what the section was granted by [`TokenBudget::allocate`]
//! - **consumed**: what it actually used, recorded by [`TokenBudget::commit`]
//!
//! Grants come out of the *unallocated* capacity, so
//! `sum(allocated) + reserved_output <= total` holds after any sequence of
//! calls, and since a commit may never exceed its allocation the same bound
//! holds for consumption.

use nexus_core::BudgetError;
use serde::{Deserialize, Serialize};

/// A named prompt section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    System,
    Identity,
    Mood,
    Memory,
    History,
    Request,
}

impl Section {
    /// Default packing priority: required sections first, memory last.
    pub const PACKING_ORDER: [Section; 6] = [
        Self::System,
        Self::Identity,
        Self::Request,
        Self::Mood,
        Self::History,
        Self::Memory,
    ];

    /// The fixed order of the five prompt slots.
    pub const PROMPT_ORDER: [Section; 5] = [
        Self::System,
        Self::Identity,
        Self::Mood,
        Self::Memory,
        Self::Request,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Identity => "identity",
            Self::Mood => "mood",
            Self::Memory => "memory",
            Self::History => "history",
            Self::Request => "request",
        }
    }

    /// Sections whose failure to fit aborts the turn.
    pub fn is_required(&self) -> bool {
        matches!(self, Self::System | Self::Identity | Self::Request)
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocation and consumption for one section, in allocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionUsage {
    pub section: Section,
    pub allocated: usize,
    pub consumed: usize,
}

#[derive(Debug, Clone)]
pub struct TokenBudget {
    total: usize,
    reserved_output: usize,
    priorities: Vec<Section>,
    /// Insertion order = order in which sections were granted.
    usage: Vec<SectionUsage>,
}

impl TokenBudget {
    /// Create a budget for one turn.
    ///
    /// `priorities` is the packing order. It must list each section at most
    /// once and start with the three required sections.
    pub fn initialize(
        total: usize,
        reserved_output: usize,
        priorities: &[Section],
    ) -> Result<Self, BudgetError> {
        if reserved_output >= total {
            return Err(BudgetError::Config {
                total,
                reserved_output,
            });
        }
        validate_priorities(priorities)?;

        Ok(Self {
            total,
            reserved_output,
            priorities: priorities.to_vec(),
            usage: Vec::with_capacity(priorities.len()),
        })
    }

    /// Budget with the default packing order.
    pub fn with_default_priorities(total: usize, reserved_output: usize) -> Result<Self, BudgetError> {
        Self::initialize(total, reserved_output, &Section::PACKING_ORDER)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn reserved_output(&self) -> usize {
        self.reserved_output
    }

    pub fn priorities(&self) -> &[Section] {
        &self.priorities
    }

    /// Capacity not yet granted to any section.
    pub fn unallocated(&self) -> usize {
        self.capacity() - self.total_allocated()
    }

    /// Grant up to `requested` tokens to `section` and return the grant.
    ///
    /// Never fails: a grant smaller than the request signals truncation and
    /// it is the caller's job to compare. Repeated calls accumulate.
    pub fn allocate(&mut self, section: Section, requested: usize) -> usize {
        let granted = requested.min(self.unallocated());
        self.entry(section).allocated += granted;
        granted
    }

    /// `total - reserved_output - sum(consumed)`.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.total_consumed()
    }

    /// Record what `section` actually used.
    pub fn commit(&mut self, section: Section, actual: usize) -> Result<(), BudgetError> {
        let allocated = self.allocated(section);
        if actual > allocated {
            return Err(BudgetError::Overrun {
                section: section.as_str().to_string(),
                actual,
                allocated,
            });
        }
        self.entry(section).consumed = actual;
        Ok(())
    }

    pub fn allocated(&self, section: Section) -> usize {
        self.find(section).map_or(0, |u| u.allocated)
    }

    pub fn consumed(&self, section: Section) -> usize {
        self.find(section).map_or(0, |u| u.consumed)
    }

    pub fn total_allocated(&self) -> usize {
        self.usage.iter().map(|u| u.allocated).sum()
    }

    pub fn total_consumed(&self) -> usize {
        self.usage.iter().map(|u| u.consumed).sum()
    }

    /// Per-section usage in allocation order.
    pub fn sections(&self) -> &[SectionUsage] {
        &self.usage
    }

    fn capacity(&self) -> usize {
        self.total - self.reserved_output
    }

    fn find(&self, section: Section) -> Option<&SectionUsage> {
        self.usage.iter().find(|u| u.section == section)
    }

    fn entry(&mut self, section: Section) -> &mut SectionUsage {
        let idx = match self.usage.iter().position(|u| u.section == section) {
            Some(i) => i,
            None => {
                self.usage.push(SectionUsage {
                    section,
                    allocated: 0,
                    consumed: 0,
                });
                self.usage.len() - 1
            }
        };
        &mut self.usage[idx]
    }
}

fn validate_priorities(priorities: &[Section]) -> Result<(), BudgetError> {
    for (i, s) in priorities.iter().enumerate() {
        if priorities[..i].contains(s) {
            return Err(BudgetError::Priorities(format!("'{s}' listed twice")));
        }
    }
    let required = priorities.iter().take_while(|s| s.is_required()).count();
    if required != 3 || priorities.iter().skip(3).any(Section::is_required) {
        return Err(BudgetError::Priorities(
            "system, identity and request must come first".into(),
        ));
    }
    Ok(())
}
