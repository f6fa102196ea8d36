pub mod change_units;
pub mod diff_parser;
pub mod git;
pub mod grouping;
pub mod normalize;
pub mod pipeline;
pub mod prompt;
pub mod review;
