//! Daily review countdown and resurfacing of due items.

use log::debug;

use chrono::NaiveDate;

use crate::model::{Item, ItemId, Subject};

/// Items that became due on this tick, in the order they were visited.
pub fn daily_tick(items: &mut [Item], today: NaiveDate) -> Vec<ItemId> {
    items
        .iter_mut()
        .filter_map(|item| item.tick_review(today).then_some(item.id))
        .collect()
}

/// Per-subject limit on how many due items resurface per review cycle.
///
/// A cycle is `space` days long: after a batch is picked the queue stays
/// quiet for `space - 1` days, the same way block spacing works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewPacer {
    speed: u32,
    space: u32,
}

/// Items picked for today and the cooldown left afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSelection {
    pub items: Vec<ItemId>,
    pub remaining_space: u32,
}

impl ReviewPacer {
    #[must_use]
    pub fn new(speed: u32, space: u32) -> Self {
        Self {
            speed: speed.max(1),
            space: space.max(1),
        }
    }

    #[must_use]
    pub fn for_subject(subject: &Subject) -> Self {
        Self::new(subject.review_speed(), subject.review_space())
    }

    /// Pick today's review items: oldest due first, then by `overall_order`.
    ///
    /// `remaining_space` is the tracker's review cooldown; while it is
    /// positive nothing is picked and it counts down by one.
    #[must_use]
    pub fn select(&self, remaining_space: u32, items: &[Item]) -> ReviewSelection {
        if remaining_space > 0 {
            return ReviewSelection {
                items: Vec::new(),
                remaining_space: remaining_space.min(self.space) - 1,
            };
        }

        let mut due: Vec<&Item> = items.iter().filter(|i| i.review.is_due()).collect();
        due.sort_by_key(|i| (i.review_due_since, i.overall_order));
        let picked: Vec<ItemId> = due
            .into_iter()
            .take(usize::try_from(self.speed).unwrap_or(usize::MAX))
            .map(|i| i.id)
            .collect();

        let remaining_space = if picked.is_empty() { 0 } else { self.space - 1 };
        debug!("review pick {picked:?}, cooldown {remaining_space}");
        ReviewSelection {
            items: picked,
            remaining_space,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{day, item};
    use crate::model::{ReviewLevel, ReviewState};

    fn due_item(id: u64, overall: u32, since: u32) -> Item {
        let mut it = item(id, 101, overall, overall);
        it.review = ReviewState {
            level: ReviewLevel::Level2,
            countdown_days: 0,
        };
        it.review_due_since = Some(day(since));
        it
    }

    #[test]
    fn tick_marks_items_reaching_zero() {
        let mut items = vec![item(1, 101, 1, 1), item(2, 101, 2, 2)];
        items[1].review = ReviewState {
            level: ReviewLevel::Level3,
            countdown_days: 1,
        };
        let became_due = daily_tick(&mut items, day(4));
        assert_eq!(became_due, vec![ItemId::new(2)]);
        assert_eq!(items[1].review_due_since, Some(day(4)));
        assert_eq!(items[0].review.countdown_days, 0);

        assert!(daily_tick(&mut items, day(5)).is_empty());
        assert_eq!(items[1].review.countdown_days, 0);
    }

    #[test]
    fn picks_oldest_due_first_up_to_speed() {
        let items = vec![due_item(1, 1, 5), due_item(2, 2, 3), due_item(3, 3, 3), item(4, 101, 4, 4)];
        let pick = ReviewPacer::new(2, 3).select(0, &items);
        assert_eq!(pick.items, vec![ItemId::new(2), ItemId::new(3)]);
        assert_eq!(pick.remaining_space, 2);
    }

    #[test]
    fn cooldown_suppresses_picks() {
        let items = vec![due_item(1, 1, 1)];
        let pacer = ReviewPacer::new(5, 3);
        let quiet = pacer.select(2, &items);
        assert!(quiet.items.is_empty());
        assert_eq!(quiet.remaining_space, 1);
        let quiet = pacer.select(1, &items);
        assert_eq!(quiet.remaining_space, 0);
        assert_eq!(pacer.select(0, &items).items.len(), 1);
    }

    #[test]
    fn nothing_due_keeps_queue_open() {
        let pick = ReviewPacer::new(5, 3).select(0, &[item(1, 101, 1, 1)]);
        assert!(pick.items.is_empty());
        assert_eq!(pick.remaining_space, 0);
    }
}
