use rand::RngCore;

/// A `ParamGen` generates values for the initial state of the model's parameters.
pub trait ParamGen {
    /// Should sample at most `n` parameters.
    ///
    /// # Arguments
    /// * `rng` - The random source, generators that don't need one ignore it.
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// An option whether the generator is exhausted.
    fn sample(&mut self, rng: &mut dyn RngCore, n: usize) -> Option<Vec<f32>>;
}
