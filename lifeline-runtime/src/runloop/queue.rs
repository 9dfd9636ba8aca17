use crate::error::LifelineError;
use std::fmt;

/// Named runloop queues, in flush order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Sync,
    Actions,
    RouterTransitions,
    Render,
    AfterRender,
    Destroy,
}

impl Queue {
    pub const ALL: [Queue; 6] = [
        Queue::Sync,
        Queue::Actions,
        Queue::RouterTransitions,
        Queue::Render,
        Queue::AfterRender,
        Queue::Destroy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Queue::Sync => "sync",
            Queue::Actions => "actions",
            Queue::RouterTransitions => "routerTransitions",
            Queue::Render => "render",
            Queue::AfterRender => "afterRender",
            Queue::Destroy => "destroy",
        }
    }

    /// `afterRender` runs after layout observation is expected to be done;
    /// owner-bound tasks may not be scheduled there.
    pub fn is_reserved(&self) -> bool {
        matches!(self, Queue::AfterRender)
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl std::str::FromStr for Queue {
    type Err = LifelineError;

    /// Queue names are matched exactly, the way the runloop spells them.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Queue::ALL
            .into_iter()
            .find(|queue| queue.name() == s)
            .ok_or_else(|| LifelineError::UnknownQueue { name: s.to_string() })
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_in_flush_order() {
        for (i, queue) in Queue::ALL.iter().enumerate() {
            assert_eq!(queue.index(), i);
            assert_eq!(queue.name().parse::<Queue>().unwrap(), *queue);
        }
    }

    #[test]
    fn unknown_and_miscased_names_are_rejected() {
        assert!(matches!("renders".parse::<Queue>(), Err(LifelineError::UnknownQueue { .. })));
        assert!("afterrender".parse::<Queue>().is_err());
    }

    #[test]
    fn only_after_render_is_reserved() {
        let reserved: Vec<_> = Queue::ALL.into_iter().filter(Queue::is_reserved).collect();
        assert_eq!(reserved, vec![Queue::AfterRender]);
    }
}
