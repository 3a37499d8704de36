use rand::Rng;

pub const NUM_BULLETS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shot {
    pub hit: bool,
    /// Chambers still loaded after this shot, before any reload.
    pub shots_remained: usize,
}

/// A revolver with a single bullet. Shots pop the last chamber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barrel {
    chambers: Vec<bool>,
}

impl Barrel {
    pub fn load(rng: &mut impl Rng) -> Self {
        let mut chambers = vec![false; NUM_BULLETS];
        chambers[rng.gen_range(0..NUM_BULLETS)] = true;
        Self { chambers }
    }

    #[cfg(test)]
    pub fn from_chambers(chambers: Vec<bool>) -> Self {
        Self { chambers }
    }

    #[cfg(test)]
    pub fn remaining(&self) -> usize {
        self.chambers.len()
    }

    /// Fires once. The barrel is reloaded as part of the shot that empties it.
    pub fn shot(&mut self, rng: &mut impl Rng) -> Shot {
        if self.chambers.is_empty() {
            *self = Self::load(rng);
        }
        let hit = self.chambers.pop().unwrap_or(false);
        let shots_remained = self.chambers.len();
        if self.chambers.is_empty() {
            *self = Self::load(rng);
        }
        Shot {
            hit,
            shots_remained,
        }
    }
}
