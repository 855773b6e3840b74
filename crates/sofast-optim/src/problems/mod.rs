pub mod facet_pose;
pub mod slope_solver;
