//! Cross-module tests and shared fixtures.

pub mod helpers;


/// Knobs shared by the heavier tests.
pub struct TestConfig {
    /// Commits issued by each stress run
    pub stress_iterations: usize,
    /// Lists in the pool of stress managers
    pub stress_pool_size: usize,
}

pub static TEST_CONFIG: spin::Mutex<TestConfig> = spin::Mutex::new(TestConfig {
    stress_iterations: 20_000,
    stress_pool_size: 4,
});
