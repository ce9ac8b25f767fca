//! IMA/DVI ADPCM encoder.
//!
//! Four bits per sample, two samples per output byte with the first sample in
//! the high nibble. If a block has an odd number of samples the last nibble is
//! dropped, so blocks should carry an even sample count.

const INDEX_TABLE: [i32; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Turns a block of PCM samples into a compressed fragment.
///
/// The state carries predictor history between blocks and must be threaded
/// through every call in stream order.
pub trait FragmentEncoder {
    type State;

    /// The "no history" state a stream starts from
    fn initial_state(&self) -> Self::State;

    fn encode(&self, block: &[i16], state: Self::State) -> (Vec<u8>, Self::State);
}

/// Predictor history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdpcmState {
    pub predicted: i32,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImaAdpcmEncoder;

impl ImaAdpcmEncoder {
    fn encode_sample(sample: i16, state: &mut AdpcmState) -> u8 {
        let mut step = STEP_TABLE[state.index];
        let mut diff = sample as i32 - state.predicted;
        let sign = if diff < 0 { 8 } else { 0 };
        if sign != 0 {
            diff = -diff;
        }

        let mut delta = 0u8;
        let mut vpdiff = step >> 3;
        if diff >= step {
            delta = 4;
            diff -= step;
            vpdiff += step;
        }
        step >>= 1;
        if diff >= step {
            delta |= 2;
            diff -= step;
            vpdiff += step;
        }
        step >>= 1;
        if diff >= step {
            delta |= 1;
            vpdiff += step;
        }

        let predicted = if sign != 0 {
            state.predicted - vpdiff
        } else {
            state.predicted + vpdiff
        };
        state.predicted = predicted.clamp(i16::MIN as i32, i16::MAX as i32);

        delta |= sign;
        state.index = (state.index as i32 + INDEX_TABLE[delta as usize]).clamp(0, 88) as usize;
        delta
    }
}

impl FragmentEncoder for ImaAdpcmEncoder {
    type State = AdpcmState;

    fn initial_state(&self) -> AdpcmState {
        AdpcmState::default()
    }

    fn encode(&self, block: &[i16], mut state: AdpcmState) -> (Vec<u8>, AdpcmState) {
        let mut out = Vec::with_capacity(block.len() / 2);
        for pair in block.chunks_exact(2) {
            let high = Self::encode_sample(pair[0], &mut state);
            let low = Self::encode_sample(pair[1], &mut state);
            out.push((high << 4) | (low & 0x0f));
        }
        if let [last] = block.chunks_exact(2).remainder() {
            // Advance the predictor; the lone nibble has nowhere to go
            Self::encode_sample(*last, &mut state);
        }
        (out, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_encodes_to_zero() {
        let encoder = ImaAdpcmEncoder;
        let (bytes, state) = encoder.encode(&[0; 8], encoder.initial_state());
        assert_eq!(bytes, vec![0; 4]);
        assert_eq!(state, AdpcmState::default());
    }

    #[test]
    fn test_known_step() {
        let encoder = ImaAdpcmEncoder;
        let (bytes, state) = encoder.encode(&[1000, 1000], encoder.initial_state());
        assert_eq!(bytes, vec![0x77]);
        assert_eq!(
            state,
            AdpcmState {
                predicted: 41,
                index: 16
            }
        );
    }

    #[test]
    fn test_negative_sample_sets_sign_bit() {
        let encoder = ImaAdpcmEncoder;
        let (bytes, state) = encoder.encode(&[-1000, 0], encoder.initial_state());
        assert_eq!(bytes[0] >> 4, 0x0f);
        assert!(state.predicted <= 0);
    }

    #[test]
    fn test_state_threads_across_blocks() {
        let encoder = ImaAdpcmEncoder;
        let signal: Vec<i16> = (0..64).map(|i| ((i * 997) % 20000 - 10000) as i16).collect();

        let (whole, whole_state) = encoder.encode(&signal, encoder.initial_state());

        let mut state = encoder.initial_state();
        let mut pieces = Vec::new();
        for block in signal.chunks(2) {
            let (bytes, next) = encoder.encode(block, state);
            pieces.extend(bytes);
            state = next;
        }

        assert_eq!(pieces, whole);
        assert_eq!(state, whole_state);
    }

    #[test]
    fn test_odd_sample_drops_nibble() {
        let encoder = ImaAdpcmEncoder;
        let (bytes, state) = encoder.encode(&[1000], encoder.initial_state());
        assert!(bytes.is_empty());
        assert_eq!(state.index, 8);
    }

    #[test]
    fn test_predictor_clamps() {
        let encoder = ImaAdpcmEncoder;
        let loud = vec![i16::MAX; 400];
        let (_, state) = encoder.encode(&loud, encoder.initial_state());
        assert!(state.predicted <= i16::MAX as i32);
        assert!(state.index <= 88);
    }
}
