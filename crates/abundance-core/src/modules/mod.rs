pub mod aggregate;
pub mod convergence;
pub mod linelist;
pub mod summary;
pub mod synthesis_fit;
pub mod tables;
pub mod traits;
pub mod uncertainty;
pub mod upper_limits;

pub use aggregate::{
    element_abundances, iron_reference, population_element_abundances, summarize,
    summarize_weighted, ElementAbundance, IronReference, SpeciesSummary,
};
pub use convergence::{run_convergence, AbundancePriors, ConvergenceReport, PriorStrategy};
pub use linelist::{import_line_list, load_line_list, parse_line_list, LineListEntry};
pub use summary::{build_tables, write_summary, SummaryTables, WrittenTables};
pub use synthesis_fit::{run_synthesis_fit, SynthesisFitReport};
pub use tables::{render_line_table, render_summary_table, LineRow};
pub use traits::{
    DetectionCheck, FitFailure, FitRequest, FittingEngine, RecordedSystematics,
    SmoothingPenalty, StellarParameterSystematics,
};
pub use uncertainty::{
    error_budget_rows, estimate_species_scatter, line_error_budgets, ErrorBudget,
    ErrorBudgetSettings, ScatterEstimate,
};
pub use upper_limits::{upper_limit_rows, upper_limit_summary};
