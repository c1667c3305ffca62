//! Ordered car queue for one target branch.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Car, CarStatus, MergeRequestId, TrainKey, UserId};

/// How many merged cars each train retains for observability.
pub const MERGED_HISTORY_LIMIT: usize = 20;

/// The ordered queue of active cars for a (project, target branch) pair,
/// plus a bounded history of recently merged cars.
///
/// Invariants maintained here:
/// - at most one active car per merge request,
/// - insertion sequence numbers are strictly increasing and never reused,
/// - a car's position only decreases when a car ahead of it leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Train {
    key: TrainKey,
    cars: Vec<Car>,
    next_seq: u64,
    merged: VecDeque<Car>,
}

impl Train {
    pub fn new(key: TrainKey) -> Self {
        Train {
            key,
            cars: Vec::new(),
            next_seq: 0,
            merged: VecDeque::new(),
        }
    }

    pub fn key(&self) -> &TrainKey {
        &self.key
    }

    /// The active cars in merge order.
    pub fn cars(&self) -> &[Car] {
        &self.cars
    }

    /// Recently merged cars, oldest first.
    pub fn merged_history(&self) -> impl Iterator<Item = &Car> {
        self.merged.iter()
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    /// The first car in line, if any.
    pub fn head(&self) -> Option<&Car> {
        self.cars.first()
    }

    /// The active car for a merge request.
    pub fn find(&self, merge_request: MergeRequestId) -> Option<&Car> {
        self.cars.iter().find(|c| c.merge_request == merge_request)
    }

    pub(crate) fn find_mut(&mut self, merge_request: MergeRequestId) -> Option<&mut Car> {
        self.cars
            .iter_mut()
            .find(|c| c.merge_request == merge_request)
    }

    /// The 0-based position of a merge request's car in the active queue.
    pub fn position_of(&self, merge_request: MergeRequestId) -> Option<usize> {
        self.cars
            .iter()
            .position(|c| c.merge_request == merge_request)
    }

    /// Appends a car at the tail.
    ///
    /// Idempotent: if the merge request already has an active car, it is
    /// returned unchanged and no new car is created.
    ///
    /// Returns the car's position and whether a car was newly created.
    pub fn enqueue(
        &mut self,
        merge_request: MergeRequestId,
        queued_by: UserId,
        queued_at: DateTime<Utc>,
    ) -> (usize, bool) {
        if let Some(position) = self.position_of(merge_request) {
            return (position, false);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let mut car = Car::new(merge_request, queued_by, seq);
        car.queued_at = queued_at;
        self.cars.push(car);
        (self.cars.len() - 1, true)
    }

    /// Removes a merge request's car from the active queue.
    ///
    /// The cascade to trailing cars is not performed here; callers schedule a
    /// refresh, and staleness is detected there by comparing recorded
    /// predecessors against the live queue.
    pub fn remove(&mut self, merge_request: MergeRequestId) -> Option<Car> {
        let position = self.position_of(merge_request)?;
        Some(self.cars.remove(position))
    }

    /// The seq of the car directly ahead of position `index`.
    fn predecessor_seq(&self, index: usize) -> Option<u64> {
        index.checked_sub(1).map(|i| self.cars[i].seq)
    }

    /// Marks every fresh car whose recorded predecessor no longer matches the
    /// live queue as stale. Returns the affected merge requests in order.
    pub fn mark_outdated_stale(&mut self) -> Vec<MergeRequestId> {
        let mut affected = Vec::new();
        for index in 0..self.cars.len() {
            let predecessor = self.predecessor_seq(index);
            let car = &mut self.cars[index];
            if car.status == CarStatus::Fresh && car.is_outdated(predecessor) && car.mark_stale() {
                affected.push(car.merge_request);
            }
        }
        affected
    }

    /// Cars that need a new validation pipeline (stale, or fresh but never
    /// validated), head-first, paired with their current predecessor seq.
    pub fn needing_validation(&self) -> Vec<(MergeRequestId, Option<u64>)> {
        self.cars
            .iter()
            .enumerate()
            .filter(|(index, car)| {
                car.status == CarStatus::Stale
                    || (car.status == CarStatus::Fresh && car.validation.is_none())
                    || (car.status == CarStatus::Fresh
                        && car.is_outdated(self.predecessor_seq(*index)))
            })
            .map(|(index, car)| (car.merge_request, self.predecessor_seq(index)))
            .collect()
    }

    /// Removes the head car as merged and records it in the bounded history.
    ///
    /// Callers must have verified merge eligibility; this only performs the
    /// structural update.
    pub fn complete_head_merge(&mut self) -> Option<Car> {
        if self.cars.is_empty() {
            return None;
        }
        let mut car = self.cars.remove(0);
        car.status = CarStatus::Merged;
        self.merged.push_back(car.clone());
        while self.merged.len() > MERGED_HISTORY_LIMIT {
            self.merged.pop_front();
        }
        Some(car)
    }
}
