// Temporal module - Time-domain feature extraction

/// Mean of absolute sample values
pub fn compute_amplitude(audio: &[f32]) -> f32 {
    if audio.is_empty() {
        return 0.0;
    }
    audio.iter().map(|s| s.abs()).sum::<f32>() / audio.len() as f32
}

/// Compute zero-crossing rate (ZCR)
///
/// Counts adjacent pairs where one sample is negative and the other is not,
/// normalized by the number of pairs. Zero counts as positive.
///
/// # Returns
/// Zero-crossing rate (0.0 to 1.0); 0.0 for fewer than two samples
pub fn compute_zcr(audio: &[f32]) -> f32 {
    if audio.len() < 2 {
        return 0.0;
    }

    let crossings = audio
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();

    crossings as f32 / (audio.len() - 1) as f32
}
