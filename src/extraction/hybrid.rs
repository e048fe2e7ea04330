//! Composition of several extractors with a mask merge policy.

use std::time::Instant;

use rayon::prelude::*;

use super::dispatch::ExtractorEnum;
use super::traits::{ExtractorMetrics, ExtractorParams, ForegroundExtractor};
use crate::config::MergePolicy;
use crate::point::PolarPoint;
use crate::{Error, Result};

/// Runs its members on the same frame and merges their masks.
#[derive(Debug)]
pub struct HybridExtractor {
    members: Vec<ExtractorEnum>,
    policy: MergePolicy,
    fallback_foreground_ratio: f64,
    member_masks: Vec<Vec<bool>>,
    member_metrics: Vec<ExtractorMetrics>,
    /// Member whose mask was used last frame under `PrimaryWithFallback`.
    selected: Option<usize>,
}

impl HybridExtractor {
    /// Members are ordered by priority; the first is the primary.
    pub fn new(
        members: Vec<ExtractorEnum>,
        policy: MergePolicy,
        fallback_foreground_ratio: f64,
    ) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::InvalidConfig(
                "hybrid extractor needs at least one member".to_string(),
            ));
        }
        if !(fallback_foreground_ratio > 0.0 && fallback_foreground_ratio <= 1.0) {
            return Err(Error::InvalidConfig(
                "fallback_foreground_ratio must lie in (0, 1]".to_string(),
            ));
        }
        let n = members.len();
        Ok(Self {
            members,
            policy,
            fallback_foreground_ratio,
            member_masks: vec![Vec::new(); n],
            member_metrics: vec![ExtractorMetrics::default(); n],
            selected: None,
        })
    }

    /// Validate `params` against every member before anything is applied.
    pub(crate) fn check_params(&self, params: &ExtractorParams) -> Result<()> {
        let ExtractorParams::Hybrid {
            fallback_foreground_ratio,
            members,
            ..
        } = params
        else {
            return Err(Error::InvalidConfig(format!(
                "hybrid extractor cannot take {} parameters",
                params.kind()
            )));
        };
        if members.len() != self.members.len() {
            return Err(Error::InvalidConfig(format!(
                "hybrid extractor has {} members, got parameters for {}",
                self.members.len(),
                members.len()
            )));
        }
        if !(*fallback_foreground_ratio > 0.0 && *fallback_foreground_ratio <= 1.0) {
            return Err(Error::InvalidConfig(
                "fallback_foreground_ratio must lie in (0, 1]".to_string(),
            ));
        }
        self.members
            .iter()
            .zip(members)
            .try_for_each(|(member, p)| member.check_params(p))
    }

    pub fn members(&self) -> &[ExtractorEnum] {
        &self.members
    }

    pub(crate) fn members_mut(&mut self) -> &mut [ExtractorEnum] {
        &mut self.members
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Per-member metrics of the last frame, in member order.
    pub fn member_metrics(&self) -> &[ExtractorMetrics] {
        &self.member_metrics
    }

    /// Member whose mask was used last frame, for `PrimaryWithFallback`.
    pub fn selected_member(&self) -> Option<usize> {
        self.selected
    }

    fn merge(&mut self, mask: &mut [bool]) {
        self.selected = None;
        match self.policy {
            MergePolicy::Union => {
                for (i, slot) in mask.iter_mut().enumerate() {
                    *slot = self.member_masks.iter().any(|m| m[i]);
                }
            }
            MergePolicy::Intersection => {
                for (i, slot) in mask.iter_mut().enumerate() {
                    *slot = self.member_masks.iter().all(|m| m[i]);
                }
            }
            MergePolicy::PrimaryWithFallback => {
                // First member that is not saturated, else the last one
                let last = self.members.len() - 1;
                let chosen = self
                    .member_metrics
                    .iter()
                    .position(|m| m.foreground_ratio <= self.fallback_foreground_ratio)
                    .unwrap_or(last);
                mask.copy_from_slice(&self.member_masks[chosen]);
                self.selected = Some(chosen);
            }
        }
    }
}

impl ForegroundExtractor for HybridExtractor {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn process_frame(
        &mut self,
        points: &[PolarPoint],
        timestamp_ns: i64,
        mask: &mut Vec<bool>,
    ) -> ExtractorMetrics {
        let start = Instant::now();

        // Members own disjoint state
        self.members
            .par_iter_mut()
            .zip(self.member_masks.par_iter_mut())
            .zip(self.member_metrics.par_iter_mut())
            .for_each(|((member, member_mask), metrics)| {
                *metrics = member.process_frame(points, timestamp_ns, member_mask);
            });

        mask.clear();
        mask.resize(points.len(), false);
        self.merge(mask);

        // Every member drops the same malformed points
        let dropped = self.member_metrics[0].dropped;
        ExtractorMetrics::from_mask(mask, dropped, start.elapsed().as_micros() as u64)
    }

    fn params(&self) -> ExtractorParams {
        ExtractorParams::Hybrid {
            policy: self.policy,
            fallback_foreground_ratio: self.fallback_foreground_ratio,
            members: self.members.iter().map(|m| m.params()).collect(),
        }
    }

    fn set_params(&mut self, params: ExtractorParams) -> Result<()> {
        self.check_params(&params)?;
        if let ExtractorParams::Hybrid {
            policy,
            fallback_foreground_ratio,
            members,
        } = params
        {
            for (member, p) in self.members.iter_mut().zip(members) {
                member.set_params(p)?;
            }
            self.policy = policy;
            self.fallback_foreground_ratio = fallback_foreground_ratio;
        }
        Ok(())
    }

    fn reset(&mut self) {
        for member in &mut self.members {
            member.reset();
        }
        self.selected = None;
    }
}
