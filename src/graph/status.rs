use strum::{Display, EnumIter};

/// Lifecycle of a single node. A validated node cycles through
/// `Changed -> Evaluated -> Deltas -> Adjusted -> WeightsAdded` for as long
/// as the graph lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Status {
    /// created, not yet validated
    #[default]
    Initialized,
    /// this node and everything downstream of it reaches a network output
    CheckedOutputs,
    /// inputs mutated since the last evaluation, values are stale
    Changed,
    /// values reflect the current inputs
    Evaluated,
    /// deltas reflect the current backward pass
    Deltas,
    /// parameter changes for the current pass are staged
    Adjusted,
    /// staged parameter changes are committed; values need recomputing
    WeightsAdded,
}

impl Status {
    /// Whether `self -> to` is a legal move.
    pub fn can_become(self, to: Status) -> bool {
        use Status::*;
        match (self, to) {
            (Initialized, CheckedOutputs) => true,
            (Initialized, _) => false,

            (CheckedOutputs, Evaluated) => true,
            (CheckedOutputs, _) => false,

            (Changed, Evaluated) => true,
            (Changed, _) => false,

            (Evaluated, Changed | Deltas) => true,
            (Evaluated, _) => false,

            // Deltas -> Deltas is the mixed-relevance re-entry
            (Deltas, Changed | Deltas | Adjusted) => true,
            (Deltas, _) => false,

            (Adjusted, Changed | WeightsAdded) => true,
            (Adjusted, _) => false,

            (WeightsAdded, Changed | Evaluated) => true,
            (WeightsAdded, _) => false,
        }
    }

    /// Values have been computed at some point since the last invalidation.
    pub fn has_values(self) -> bool {
        use Status::*;
        match self {
            Initialized | CheckedOutputs | Changed => false,
            Evaluated | Deltas | Adjusted | WeightsAdded => true,
        }
    }

    /// Evaluation can be skipped. A committed node has new parameters, so its
    /// values are never current.
    pub fn is_current(self) -> bool {
        use Status::*;
        match self {
            Evaluated | Deltas | Adjusted => true,
            Initialized | CheckedOutputs | Changed | WeightsAdded => false,
        }
    }

    pub fn has_deltas(self) -> bool {
        use Status::*;
        match self {
            Deltas | Adjusted | WeightsAdded => true,
            Initialized | CheckedOutputs | Changed | Evaluated => false,
        }
    }

    pub fn is_adjusted(self) -> bool {
        use Status::*;
        match self {
            Adjusted | WeightsAdded => true,
            Initialized | CheckedOutputs | Changed | Evaluated | Deltas => false,
        }
    }

    pub fn is_validated(self) -> bool {
        !matches!(self, Status::Initialized)
    }

    /// The status to record once deltas are known. Nodes already past the
    /// deltas stage keep their status.
    pub fn after_deltas(self) -> Status {
        use Status::*;
        match self {
            Evaluated | Deltas => Deltas,
            s => s,
        }
    }
}

/// Whether a node holds parameter changes that still need committing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum Staging {
    #[default]
    Clean,
    Staged,
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn nothing_returns_to_initialized() {
        for s in Status::iter() {
            assert!(!s.can_become(Status::Initialized), "{s} -> initialized");
        }
    }

    #[test]
    fn training_cycle_is_legal() {
        use Status::*;
        let cycle = [CheckedOutputs, Evaluated, Deltas, Adjusted, WeightsAdded, Changed, Evaluated];
        for w in cycle.windows(2) {
            assert!(w[0].can_become(w[1]), "{} -> {}", w[0], w[1]);
        }
        assert!(Initialized.can_become(CheckedOutputs));
    }

    #[test]
    fn invalidation_only_from_computed_values() {
        for s in Status::iter() {
            assert_eq!(s.can_become(Status::Changed), s.has_values(), "{s}");
        }
    }

    #[test]
    fn only_adjusted_nodes_are_committed() {
        for s in Status::iter() {
            assert_eq!(s.can_become(Status::WeightsAdded), s == Status::Adjusted, "{s}");
        }
    }

    #[test]
    fn weights_added_forces_evaluation() {
        assert!(Status::WeightsAdded.has_values());
        assert!(!Status::WeightsAdded.is_current());
        assert!(Status::Adjusted.is_current());
    }

    #[test]
    fn after_deltas_never_moves_back() {
        assert_eq!(Status::Evaluated.after_deltas(), Status::Deltas);
        assert_eq!(Status::Adjusted.after_deltas(), Status::Adjusted);
        assert_eq!(Status::WeightsAdded.after_deltas(), Status::WeightsAdded);
    }
}
