//! Flattening of estimation outputs into the tabular records of
//! [`cp_core::ResultTables`].

use cp_core::{
    CoefficientRecord, EstimationRecord, PlaceboRecord, ResultTables, RobustnessRecord,
};

use crate::econometrics::{EstimationResult, PlaceboDistribution, RobustnessTest};

/// Accumulates records for one run.
#[derive(Debug, Default)]
pub struct ResultAssembler {
    tables: ResultTables,
}

impl ResultAssembler {
    /// Empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one estimation: a treatment-effect row and one row per regressor.
    pub fn add_estimation(&mut self, result: &EstimationResult) -> &mut Self {
        if let Some(rec) = estimation_record(result) {
            self.tables.estimates.push(rec);
        }
        let treatment = result.treatment_index;
        for (j, term) in result.names.iter().enumerate() {
            self.tables.coefficients.push(CoefficientRecord {
                specification: result.specification.clone(),
                sample: result.sample.clone(),
                term: term.clone(),
                coefficient: result.coefficients[j],
                std_error: result.std_errors[j],
                t_stat: result.t_stats[j],
                p_value: result.p_values[j],
                ci_low: result.ci_lower[j],
                ci_high: result.ci_upper[j],
                is_treatment: treatment == Some(j),
            });
        }
        self
    }

    /// Add robustness tests in order, failures as marked rows.
    pub fn add_robustness(&mut self, tests: &[RobustnessTest]) -> &mut Self {
        for t in tests {
            let rec = match &t.outcome {
                Ok(r) => RobustnessRecord {
                    test_name: t.name.clone(),
                    test_type: t.test_type,
                    specification: t.specification.clone(),
                    coefficient: r.treatment_effect(),
                    std_error: r.treatment_std_error(),
                    p_value: r.treatment_p_value(),
                    n_obs: Some(r.n_obs),
                    failure_marker: false,
                    failure_kind: None,
                    failure_message: None,
                },
                Err(f) => RobustnessRecord {
                    test_name: t.name.clone(),
                    test_type: t.test_type,
                    specification: t.specification.clone(),
                    coefficient: None,
                    std_error: None,
                    p_value: None,
                    n_obs: None,
                    failure_marker: true,
                    failure_kind: Some(f.kind.as_str().to_string()),
                    failure_message: Some(f.message.clone()),
                },
            };
            self.tables.robustness.push(rec);
        }
        self
    }

    /// Add the placebo draws followed by one summary row.
    pub fn add_placebo(&mut self, dist: &PlaceboDistribution) -> &mut Self {
        for d in &dist.draws {
            let (coefficient, std_error, failure_message) = match &d.outcome {
                Ok(r) => (r.treatment_effect(), r.treatment_std_error(), None),
                Err(f) => (None, None, Some(f.message.clone())),
            };
            self.tables.placebo.push(PlaceboRecord {
                kind: "draw".into(),
                draw_index: Some(d.draw_index),
                seed: Some(d.seed),
                coefficient,
                std_error,
                placebo_mean: None,
                placebo_sd: None,
                empirical_p_value: None,
                n_successful: None,
                failure_message,
            });
        }
        let s = &dist.summary;
        self.tables.placebo.push(PlaceboRecord {
            kind: "summary".into(),
            draw_index: None,
            seed: Some(s.seed),
            coefficient: Some(s.real_coefficient),
            std_error: Some(s.real_std_error),
            placebo_mean: s.mean,
            placebo_sd: s.sd,
            empirical_p_value: s.empirical_p_value,
            n_successful: Some(s.n_successful),
            failure_message: None,
        });
        self
    }

    /// Finished tables.
    pub fn finish(self) -> ResultTables {
        self.tables
    }
}

fn estimation_record(r: &EstimationResult) -> Option<EstimationRecord> {
    let j = r.treatment_index?;
    Some(EstimationRecord {
        specification: r.specification.clone(),
        sample: r.sample.clone(),
        n_obs: r.n_obs,
        coefficient: r.coefficients[j],
        std_error: r.std_errors[j],
        p_value: r.p_values[j],
        ci_low: r.ci_lower[j],
        ci_high: r.ci_upper[j],
        dropped_rows: r.dropped_rows,
        inference: r.inference.as_str().to_string(),
        n_clusters: r.n_clusters,
        df_resid: r.df_resid,
    })
}
