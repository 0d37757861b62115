//! Token usage accounting.

use serde::{Deserialize, Serialize};

/// Token usage for a generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_every_counter() {
        let mut total = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        };
        total.merge(&Usage {
            input_tokens: 1,
            output_tokens: 2,
            total_tokens: 3,
        });

        assert_eq!(
            total,
            Usage {
                input_tokens: 11,
                output_tokens: 7,
                total_tokens: 18,
            }
        );
    }
}
