//! Core lifeform simulation engine for the vivarium workspace.
//!
//! The engine is deterministic and tick-based: a population of lifeforms on a
//! fixed 2D grid ages, moves, collides, breeds, and fights, while external
//! controllers tune session parameters between ticks. Rendering, audio, and
//! device input live in other crates and only ever read the observables or
//! submit [`ControlCommand`]s.

use rand::{rngs::SmallRng, Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use vivarium_grid::{GridError, OccupancyGrid};

new_key_type! {
    /// Stable handle for lifeforms backed by a generational slot map.
    ///
    /// Generational keys guarantee an id is never reassigned within a run.
    pub struct LifeformId;
}

/// Number of random probes attempted when placing a lifeform without an
/// explicit position.
pub const SPAWN_PROBE_LIMIT: usize = 100;

/// Upper bound on a lifeform's momentum.
pub const MOMENTUM_MAX: f32 = 100.0;

/// Momentum gained per cell fallen under gravity.
pub const MOMENTUM_GAIN: f32 = 5.0;

/// Momentum shed per non-falling move.
pub const MOMENTUM_DECAY: f32 = 2.0;

/// The nine symbolic headings a lifeform can carry.
///
/// `Still` is a real heading: a lifeform whose movement countdown elapses
/// while heading `Still` simply skips its move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Heading {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
    Still,
}

impl Heading {
    /// All nine headings, in the fixed order used for uniform draws and
    /// genetic selection.
    pub const ALL: [Self; 9] = [
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::UpLeft,
        Self::UpRight,
        Self::DownLeft,
        Self::DownRight,
        Self::Still,
    ];

    /// Heading selected by a genetic draw.
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }

    /// Cell delta for one move along this heading. The y axis grows downward,
    /// so `Down` is the gravity direction.
    #[must_use]
    pub const fn delta(self) -> (i64, i64) {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
            Self::UpLeft => (-1, -1),
            Self::UpRight => (1, -1),
            Self::DownLeft => (-1, 1),
            Self::DownRight => (1, 1),
            Self::Still => (0, 0),
        }
    }
}

/// Deterministic per-seed gene generator.
///
/// A plain linear-congruential sequence: `state = (state * 9301 + 49297)
/// mod 233280`, each draw normalized to `[0, 1)`. Every genome seed gets its
/// own independent sequence, so attribute derivation never couples to the
/// gameplay RNG.
#[derive(Debug, Clone)]
pub struct GeneSequence {
    state: u64,
}

impl GeneSequence {
    const MULTIPLIER: u64 = 9_301;
    const INCREMENT: u64 = 49_297;
    const MODULUS: u64 = 233_280;

    /// Start a sequence from a genome seed.
    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self {
            state: seed as u64,
        }
    }

    /// Next value in `[0, 1)`.
    pub fn next_fraction(&mut self) -> f32 {
        self.state = (self
            .state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT))
            % Self::MODULUS;
        self.state as f32 / Self::MODULUS as f32
    }

    /// Next value scaled to `[0, scale)` and floored.
    pub fn next_scaled(&mut self, scale: u32) -> f32 {
        (self.next_fraction() * scale as f32).floor()
    }
}

/// Three integer seeds fully determining a lifeform's derived attributes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Genome {
    pub seeds: [u32; 3],
}

impl Genome {
    /// Construct a genome from explicit seeds.
    #[must_use]
    pub const fn new(seeds: [u32; 3]) -> Self {
        Self { seeds }
    }

    /// Draw a fresh genome from the gameplay RNG.
    pub fn random(rng: &mut dyn RngCore) -> Self {
        Self {
            seeds: [rng.random(), rng.random(), rng.random()],
        }
    }

    /// Child genome for two parents.
    ///
    /// Per gene: with probability `chaos_chance / 100` the seed mutates fully
    /// at random; otherwise it is copied from a parent chosen by a fair coin
    /// flip. Uses the injected gameplay RNG, never the gene sequences.
    pub fn inherit(a: Self, b: Self, chaos_chance: f32, rng: &mut dyn RngCore) -> Self {
        let chaos = (chaos_chance / 100.0).clamp(0.0, 1.0);
        let mut seeds = [0u32; 3];
        for (gene, slot) in seeds.iter_mut().enumerate() {
            *slot = if rng.random::<f32>() < chaos {
                rng.random()
            } else if rng.random_bool(0.5) {
                a.seeds[gene]
            } else {
                b.seeds[gene]
            };
        }
        Self { seeds }
    }
}

/// Attribute set derived once from a genome at creation.
///
/// Derivation is pure and deterministic: identical seeds and config always
/// yield an identical attribute set. Gameplay events mutate the runtime copies
/// held by [`Lifeform`], never these derived values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Attributes {
    pub color: [u8; 3],
    pub aggression_factor: f32,
    pub weight: f32,
    pub strength: f32,
    pub friend_factor: f32,
    pub breed_threshold: f32,
    pub momentum: f32,
    pub time_to_move: f32,
    pub time_to_live: f32,
    pub direction: Heading,
    pub preferred_direction: Heading,
}

impl Attributes {
    /// Derive the full attribute set from `genome` under `config`.
    ///
    /// Each seed drives its own [`GeneSequence`], and draws happen in a fixed
    /// order, so the mapping from genome to attributes is stable across runs.
    #[must_use]
    pub fn derive(genome: &Genome, config: &SessionConfig) -> Self {
        let mut gene1 = GeneSequence::new(genome.seeds[0]);
        let mut gene2 = GeneSequence::new(genome.seeds[1]);
        let mut gene3 = GeneSequence::new(genome.seeds[2]);

        let color = [
            Self::channel(&mut gene1),
            Self::channel(&mut gene1),
            Self::channel(&mut gene1),
        ];
        let aggression_factor = gene1.next_scaled(config.max_attribute);
        let weight = gene1.next_scaled(config.max_attribute);
        let strength = gene1.next_scaled(config.max_attribute);

        let friend_factor = gene2.next_scaled(config.max_enemy_factor);
        let breed_base = gene2.next_scaled(config.max_attribute);
        // Small friend factors produce arbitrarily large thresholds, which
        // makes breeding dominate combat for many genomes. Intended behavior.
        let breed_threshold = if friend_factor == 0.0 {
            breed_base
        } else {
            breed_base / friend_factor
        };
        let momentum = gene2.next_scaled(100);
        let time_to_move = 1.0 + gene2.next_scaled(9);

        let time_to_live = 100.0 + gene3.next_scaled(config.max_attribute.saturating_mul(10));
        let direction = Heading::from_index(gene3.next_scaled(9) as usize);
        let preferred_direction = Heading::from_index(gene3.next_scaled(9) as usize);

        Self {
            color,
            aggression_factor,
            weight,
            strength,
            friend_factor,
            breed_threshold,
            momentum,
            time_to_move,
            time_to_live,
            direction,
            preferred_direction,
        }
    }

    fn channel(gene: &mut GeneSequence) -> u8 {
        (gene.next_fraction() * 256.0).floor().min(255.0) as u8
    }
}

/// Errors raised when validating session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates an out-of-range tunable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Grid construction failure surfaced through configuration validation.
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Tunable session parameters read once per tick.
///
/// External collaborators (device adapters, UI buttons) only ever write these
/// between ticks through [`ControlCommand`]s; the engine snapshots the values
/// at the top of every [`Vivarium::step`], so a change is visible starting
/// from the next tick, never retroactively inside a tick in progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Aging accelerator in `[0, 100]`; each tick drains
    /// `1 + radiation * 0.001` from every time-to-live budget.
    pub radiation: f32,
    /// When set, heavy or spent lifeforms are forced into downward moves.
    pub gravity_on: bool,
    /// Hard cap on the live population; creations beyond it are dropped.
    pub population_limit: u32,
    /// Percent chance in `[0, 100]` that an inherited gene mutates fully at
    /// random instead of copying a parent seed.
    pub dna_chaos_chance: f32,
    /// Scale used when deriving numeric genes.
    pub max_attribute: u32,
    /// Scale used when deriving the friend factor.
    pub max_enemy_factor: u32,
    /// Width of the world grid in cells.
    pub world_width: u32,
    /// Height of the world grid in cells.
    pub world_height: u32,
    /// Optional RNG seed for reproducible gameplay randomness.
    pub rng_seed: Option<u64>,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            radiation: 0.0,
            gravity_on: false,
            population_limit: 500,
            dna_chaos_chance: 5.0,
            max_attribute: 100,
            max_enemy_factor: 8,
            // Matches the shadow-feed grid the installation projects onto.
            world_width: 160,
            world_height: 120,
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Validate tunable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.radiation) {
            return Err(ConfigError::InvalidConfig(
                "radiation must be within [0, 100]",
            ));
        }
        if !(0.0..=100.0).contains(&self.dna_chaos_chance) {
            return Err(ConfigError::InvalidConfig(
                "dna_chaos_chance must be within [0, 100]",
            ));
        }
        if self.max_attribute == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_attribute must be non-zero",
            ));
        }
        if self.max_enemy_factor == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_enemy_factor must be non-zero",
            ));
        }
        if self.world_width == 0 || self.world_height == 0 {
            return Err(ConfigError::InvalidConfig(
                "world dimensions must be non-zero",
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// One simulated organism.
///
/// Position and runtime counters mutate only through engine-owned methods so
/// the occupancy grid and lifeform state can never desynchronize; the derived
/// [`Attributes`] are frozen at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifeform {
    x: u32,
    y: u32,
    genome: Genome,
    attributes: Attributes,
    strength: f32,
    momentum: f32,
    direction: Heading,
    time_to_move_count: f32,
    time_to_live_count: f32,
    waiting_to_spawn: bool,
    pending_child: Option<Genome>,
}

impl Lifeform {
    fn new(x: u32, y: u32, genome: Genome, attributes: Attributes) -> Self {
        Self {
            x,
            y,
            genome,
            strength: attributes.strength,
            momentum: attributes.momentum,
            direction: attributes.direction,
            time_to_move_count: attributes.time_to_move,
            time_to_live_count: attributes.time_to_live,
            attributes,
            waiting_to_spawn: false,
            pending_child: None,
        }
    }

    /// Current cell.
    #[must_use]
    pub const fn position(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    /// Genome this lifeform was created with.
    #[must_use]
    pub const fn genome(&self) -> Genome {
        self.genome
    }

    /// Derived attributes, frozen at creation.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Display color channels.
    #[must_use]
    pub const fn color(&self) -> [u8; 3] {
        self.attributes.color
    }

    /// Current strength, including combat absorption.
    #[must_use]
    pub const fn strength(&self) -> f32 {
        self.strength
    }

    /// Current momentum.
    #[must_use]
    pub const fn momentum(&self) -> f32 {
        self.momentum
    }

    /// Current heading.
    #[must_use]
    pub const fn direction(&self) -> Heading {
        self.direction
    }

    /// Remaining time-to-live budget.
    #[must_use]
    pub const fn time_to_live_count(&self) -> f32 {
        self.time_to_live_count
    }

    /// Ticks until the next movement attempt.
    #[must_use]
    pub const fn time_to_move_count(&self) -> f32 {
        self.time_to_move_count
    }

    /// Whether a birth is pending next to this lifeform.
    #[must_use]
    pub const fn waiting_to_spawn(&self) -> bool {
        self.waiting_to_spawn
    }
}

/// Dense storage with generational handles and stable iteration order.
///
/// Rows are kept dense for cache-friendly iteration; the slot map provides the
/// id indirection. Removal swap-fills, and handle order is the collection
/// order the tick pipeline walks.
#[derive(Debug, Default)]
pub struct LifeformArena {
    slots: SlotMap<LifeformId, usize>,
    handles: Vec<LifeformId>,
    rows: Vec<Lifeform>,
}

impl LifeformArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live lifeforms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when no lifeforms are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if `id` refers to a live lifeform.
    #[must_use]
    pub fn contains(&self, id: LifeformId) -> bool {
        self.slots.contains_key(id)
    }

    /// Iterate over live handles in collection order.
    pub fn iter_handles(&self) -> impl Iterator<Item = LifeformId> + '_ {
        self.handles.iter().copied()
    }

    /// Handle at a dense index; used for uniform random draws.
    #[must_use]
    pub fn handle_at(&self, index: usize) -> Option<LifeformId> {
        self.handles.get(index).copied()
    }

    /// Borrow the lifeform for `id`.
    #[must_use]
    pub fn get(&self, id: LifeformId) -> Option<&Lifeform> {
        let index = *self.slots.get(id)?;
        self.rows.get(index)
    }

    fn get_mut(&mut self, id: LifeformId) -> Option<&mut Lifeform> {
        let index = *self.slots.get(id)?;
        self.rows.get_mut(index)
    }

    fn insert(&mut self, lifeform: Lifeform) -> LifeformId {
        let index = self.rows.len();
        self.rows.push(lifeform);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    fn remove(&mut self, id: LifeformId) -> Option<Lifeform> {
        let index = self.slots.remove(id)?;
        let removed = self.rows.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        Some(removed)
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.handles.clear();
        self.rows.clear();
    }
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Events emitted after processing one tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    pub births: usize,
    pub deaths: usize,
}

/// Per-tick aggregate retained in the bounded history buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: Tick,
    pub population: usize,
    pub births: usize,
    pub deaths: usize,
}

/// The simulation engine: lifeform collection, world occupancy, and the
/// tick pipeline.
pub struct Vivarium {
    config: SessionConfig,
    rng: SmallRng,
    arena: LifeformArena,
    occupancy: OccupancyGrid<LifeformId>,
    tick: Tick,
    lifetime_created: u64,
    peak_population: usize,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for Vivarium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vivarium")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("population", &self.arena.len())
            .field("lifetime_created", &self.lifetime_created)
            .finish()
    }
}

impl Vivarium {
    /// Instantiate a new engine using the supplied configuration.
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let occupancy = OccupancyGrid::new(config.world_width, config.world_height)?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            rng,
            arena: LifeformArena::new(),
            occupancy,
            tick: Tick::zero(),
            lifetime_created: 0,
            peak_population: 0,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Mutable access to the configuration (for hot edits between ticks).
    #[must_use]
    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Number of live lifeforms.
    #[must_use]
    pub fn population(&self) -> usize {
        self.arena.len()
    }

    /// Total lifeforms created since boot or the last reset.
    #[must_use]
    pub const fn lifetime_created(&self) -> u64 {
        self.lifetime_created
    }

    /// Historical peak population since boot or the last reset.
    #[must_use]
    pub const fn peak_population(&self) -> usize {
        self.peak_population
    }

    /// Read-only access to the lifeform arena.
    #[must_use]
    pub fn lifeforms(&self) -> &LifeformArena {
        &self.arena
    }

    /// Borrow a specific lifeform.
    #[must_use]
    pub fn lifeform(&self, id: LifeformId) -> Option<&Lifeform> {
        self.arena.get(id)
    }

    /// Read-only access to the world occupancy index.
    #[must_use]
    pub fn occupancy(&self) -> &OccupancyGrid<LifeformId> {
        &self.occupancy
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Create a lifeform, optionally at an explicit position or with an
    /// explicit genome.
    ///
    /// Returns `None` without side effect when the population is at its
    /// limit, when an explicit position is out of bounds or occupied, or when
    /// no explicit position is given and [`SPAWN_PROBE_LIMIT`] random probes
    /// all land on occupied cells. Callers treat `None` as "try again later".
    pub fn create_lifeform(
        &mut self,
        position: Option<(u32, u32)>,
        genome: Option<Genome>,
    ) -> Option<LifeformId> {
        if self.arena.len() >= self.config.population_limit as usize {
            return None;
        }
        let (x, y) = match position {
            Some((x, y)) => {
                if !self.occupancy.is_free(x, y) {
                    return None;
                }
                (x, y)
            }
            None => self.find_free_position()?,
        };
        let genome = genome.unwrap_or_else(|| Genome::random(&mut self.rng));
        Some(self.spawn_at(x, y, genome))
    }

    /// Remove a lifeform and free its cell. Unknown ids are a silent no-op.
    pub fn remove_lifeform(&mut self, id: LifeformId) {
        if let Some(lifeform) = self.arena.remove(id) {
            let vacated = self.occupancy.vacate(lifeform.x, lifeform.y);
            debug_assert_eq!(vacated, Some(id));
        }
    }

    /// Clear all lifeforms, occupancy, counters, and history.
    ///
    /// Stopping the frame driver is the caller's concern; no lifeform state
    /// needs unwinding beyond this wipe.
    pub fn reset(&mut self) {
        self.arena.clear();
        self.occupancy.clear();
        self.tick = Tick::zero();
        self.lifetime_created = 0;
        self.peak_population = 0;
        self.history.clear();
    }

    /// Remove exactly `floor(n / 2)` lifeforms chosen by repeated uniform
    /// draw from the current population. Returns the number removed.
    ///
    /// The target count is computed once up front, not against the shrinking
    /// population.
    pub fn thanos_snap(&mut self) -> usize {
        let target = self.arena.len() / 2;
        for _ in 0..target {
            let index = self.rng.random_range(0..self.arena.len());
            if let Some(id) = self.arena.handle_at(index) {
                self.remove_lifeform(id);
            }
        }
        target
    }

    /// Probe up to [`SPAWN_PROBE_LIMIT`] random cells for a free one.
    pub fn find_free_position(&mut self) -> Option<(u32, u32)> {
        for _ in 0..SPAWN_PROBE_LIMIT {
            let x = self.rng.random_range(0..self.config.world_width);
            let y = self.rng.random_range(0..self.config.world_height);
            if self.occupancy.is_free(x, y) {
                return Some((x, y));
            }
        }
        None
    }

    /// First free cell in the fixed-order 8-neighborhood of `(x, y)`.
    #[must_use]
    pub fn find_adjacent_free_position(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        self.occupancy.first_free_neighbor(x, y)
    }

    /// Execute one simulation tick, returning emitted events.
    ///
    /// Tunables are snapshotted at the top, so mid-run configuration edits
    /// take effect on the next call. Lifeforms born during this tick are
    /// first processed on the following one.
    pub fn step(&mut self) -> TickEvents {
        let tunables = self.config.clone();
        let mut births = 0usize;
        let mut deaths = 0usize;

        let handles: Vec<LifeformId> = self.arena.iter_handles().collect();
        for id in handles {
            // Combat earlier in this tick may have absorbed this lifeform.
            if !self.arena.contains(id) {
                continue;
            }
            if self.stage_aging(id, &tunables) {
                deaths += 1;
                continue;
            }
            self.stage_movement(id, &tunables, &mut deaths);
            if !self.arena.contains(id) {
                // The mover lost the combat it initiated.
                continue;
            }
            births += self.stage_birth(id, &tunables);
        }

        self.tick = self.tick.next();
        self.peak_population = self.peak_population.max(self.arena.len());
        self.push_summary(births, deaths);
        self.debug_assert_occupancy_coherent();

        TickEvents {
            tick: self.tick,
            births,
            deaths,
        }
    }

    /// Apply aging; returns true when the lifeform died of it.
    fn stage_aging(&mut self, id: LifeformId, tunables: &SessionConfig) -> bool {
        let Some(lifeform) = self.arena.get_mut(id) else {
            return false;
        };
        lifeform.time_to_live_count -= 1.0 + tunables.radiation * 0.001;
        if lifeform.time_to_live_count <= 0.0 {
            self.remove_lifeform(id);
            true
        } else {
            false
        }
    }

    /// Decrement the movement countdown and attempt a move when it elapses.
    fn stage_movement(&mut self, id: LifeformId, tunables: &SessionConfig, deaths: &mut usize) {
        let elapsed = {
            let Some(lifeform) = self.arena.get_mut(id) else {
                return;
            };
            lifeform.time_to_move_count -= 1.0;
            if lifeform.time_to_move_count <= 0.0 {
                lifeform.time_to_move_count = lifeform.attributes.time_to_move;
                true
            } else {
                false
            }
        };
        if elapsed {
            self.move_lifeform(id, tunables, deaths);
        }
    }

    /// Attempt one move along the lifeform's heading.
    fn move_lifeform(&mut self, id: LifeformId, tunables: &SessionConfig, deaths: &mut usize) {
        let (x, y, mut direction, strength, weight, momentum) = {
            let Some(lifeform) = self.arena.get(id) else {
                return;
            };
            (
                lifeform.x,
                lifeform.y,
                lifeform.direction,
                lifeform.strength,
                lifeform.attributes.weight,
                lifeform.momentum,
            )
        };

        // Gravity overrides this attempt only; the preferred heading survives.
        if tunables.gravity_on && (strength < weight || momentum <= 0.0) {
            direction = Heading::Down;
        }

        let (dx, dy) = direction.delta();
        if dx == 0 && dy == 0 {
            return;
        }

        let cx = i64::from(x) + dx;
        let cy = i64::from(y) + dy;
        if !self.occupancy.contains(cx, cy) {
            self.change_direction(id);
            return;
        }
        let (nx, ny) = (cx as u32, cy as u32);

        if let Some(occupant) = self.occupancy.occupant(nx, ny) {
            self.resolve_collision(id, occupant, tunables, deaths);
            // The mover stays put this tick regardless of the outcome.
            if self.arena.contains(id) {
                self.change_direction(id);
            }
            return;
        }

        let moved = self.occupancy.relocate((x, y), (nx, ny), id);
        debug_assert!(moved, "free target cell must accept relocation");
        if let Some(lifeform) = self.arena.get_mut(id) {
            lifeform.x = nx;
            lifeform.y = ny;
            let falling = tunables.gravity_on && dy > 0;
            lifeform.momentum = if falling {
                (lifeform.momentum + MOMENTUM_GAIN).min(MOMENTUM_MAX)
            } else {
                (lifeform.momentum - MOMENTUM_DECAY).max(0.0)
            };
        }
    }

    /// Stochastic heading change after a blocked move. Not a pathfinding
    /// correction: 50% revert to the preferred heading when different,
    /// otherwise a uniform draw over all nine headings.
    fn change_direction(&mut self, id: LifeformId) {
        let (current, preferred) = match self.arena.get(id) {
            Some(lifeform) => (lifeform.direction, lifeform.attributes.preferred_direction),
            None => return,
        };
        let next = if current != preferred && self.rng.random_bool(0.5) {
            preferred
        } else {
            Heading::ALL[self.rng.random_range(0..Heading::ALL.len())]
        };
        if let Some(lifeform) = self.arena.get_mut(id) {
            lifeform.direction = next;
        }
    }

    /// Resolve a collision between `mover` and the stationary `occupant`.
    ///
    /// Aggression difference within the mover's breed threshold queues a
    /// birth on the mover alone; anything beyond it is combat, where the
    /// stronger side absorbs the loser's remaining time-to-live and half its
    /// strength. Exact strength ties fall to a fair coin flip.
    fn resolve_collision(
        &mut self,
        mover: LifeformId,
        occupant: LifeformId,
        tunables: &SessionConfig,
        deaths: &mut usize,
    ) {
        let (mover_aggression, mover_threshold, mover_strength, mover_waiting, mover_genome) = {
            let Some(lifeform) = self.arena.get(mover) else {
                return;
            };
            (
                lifeform.attributes.aggression_factor,
                lifeform.attributes.breed_threshold,
                lifeform.strength,
                lifeform.waiting_to_spawn,
                lifeform.genome,
            )
        };
        let (occupant_aggression, occupant_strength, occupant_genome) = {
            let Some(lifeform) = self.arena.get(occupant) else {
                return;
            };
            (
                lifeform.attributes.aggression_factor,
                lifeform.strength,
                lifeform.genome,
            )
        };

        let difference = (mover_aggression - occupant_aggression).abs();
        if difference <= mover_threshold {
            // Breeding is asymmetric: only the mover accrues the pending
            // birth, and an existing one is never replaced.
            if !mover_waiting {
                let child = Genome::inherit(
                    mover_genome,
                    occupant_genome,
                    tunables.dna_chaos_chance,
                    &mut self.rng,
                );
                if let Some(lifeform) = self.arena.get_mut(mover) {
                    lifeform.waiting_to_spawn = true;
                    lifeform.pending_child = Some(child);
                }
            }
            return;
        }

        let mover_wins = if mover_strength > occupant_strength {
            true
        } else if mover_strength < occupant_strength {
            false
        } else {
            self.rng.random_bool(0.5)
        };
        let (winner, loser) = if mover_wins {
            (mover, occupant)
        } else {
            (occupant, mover)
        };

        let (loser_ttl, loser_strength) = {
            let Some(lifeform) = self.arena.get(loser) else {
                return;
            };
            (lifeform.time_to_live_count, lifeform.strength)
        };
        self.remove_lifeform(loser);
        *deaths += 1;
        if let Some(lifeform) = self.arena.get_mut(winner) {
            lifeform.time_to_live_count += loser_ttl;
            lifeform.strength += (loser_strength * 0.5).floor();
        }
    }

    /// Place a pending child next to its parent when population allows.
    /// Returns the number of births (0 or 1).
    fn stage_birth(&mut self, id: LifeformId, tunables: &SessionConfig) -> usize {
        let (x, y, pending) = {
            let Some(lifeform) = self.arena.get(id) else {
                return 0;
            };
            if !lifeform.waiting_to_spawn {
                return 0;
            }
            (lifeform.x, lifeform.y, lifeform.pending_child)
        };
        if self.arena.len() >= tunables.population_limit as usize {
            return 0;
        }
        let Some(genome) = pending else {
            return 0;
        };
        // No free neighbor: the request stays pending and retries next tick.
        let Some((nx, ny)) = self.find_adjacent_free_position(x, y) else {
            return 0;
        };
        self.spawn_at(nx, ny, genome);
        if let Some(lifeform) = self.arena.get_mut(id) {
            lifeform.waiting_to_spawn = false;
            lifeform.pending_child = None;
        }
        1
    }

    /// Insert a lifeform at a cell the caller has verified to be free.
    fn spawn_at(&mut self, x: u32, y: u32, genome: Genome) -> LifeformId {
        let attributes = Attributes::derive(&genome, &self.config);
        let id = self.arena.insert(Lifeform::new(x, y, genome, attributes));
        let occupied = self.occupancy.occupy(x, y, id);
        debug_assert!(occupied, "spawn target cell must be free");
        self.lifetime_created += 1;
        self.peak_population = self.peak_population.max(self.arena.len());
        id
    }

    fn push_summary(&mut self, births: usize, deaths: usize) {
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(TickSummary {
            tick: self.tick,
            population: self.arena.len(),
            births,
            deaths,
        });
    }

    #[inline]
    fn debug_assert_occupancy_coherent(&self) {
        debug_assert_eq!(self.occupancy.len(), self.arena.len());
        #[cfg(debug_assertions)]
        for id in self.arena.iter_handles() {
            if let Some(lifeform) = self.arena.get(id) {
                debug_assert_eq!(self.occupancy.occupant(lifeform.x, lifeform.y), Some(id));
            }
        }
    }
}

/// Commands external controllers submit between ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlCommand {
    SetRadiation(f32),
    SetGravity(bool),
    SetPopulationLimit(u32),
    SetDnaChaosChance(f32),
    Spawn { position: Option<(u32, u32)> },
    Remove(LifeformId),
    ThanosSnap,
    Reset,
}

/// Apply a control command to the engine, clamping tunables to their
/// documented ranges. Failed spawns are dropped silently (capacity or
/// placement exhaustion is never fatal).
pub fn apply_control_command(world: &mut Vivarium, command: ControlCommand) {
    match command {
        ControlCommand::SetRadiation(value) => {
            world.config_mut().radiation = value.clamp(0.0, 100.0);
        }
        ControlCommand::SetGravity(on) => {
            world.config_mut().gravity_on = on;
        }
        ControlCommand::SetPopulationLimit(limit) => {
            world.config_mut().population_limit = limit;
        }
        ControlCommand::SetDnaChaosChance(value) => {
            world.config_mut().dna_chaos_chance = value.clamp(0.0, 100.0);
        }
        ControlCommand::Spawn { position } => {
            let _ = world.create_lifeform(position, None);
        }
        ControlCommand::Remove(id) => {
            world.remove_lifeform(id);
        }
        ControlCommand::ThanosSnap => {
            let _ = world.thanos_snap();
        }
        ControlCommand::Reset => {
            world.reset();
        }
    }
}
