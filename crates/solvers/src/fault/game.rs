//! The game module holds the [Game] graph, the local copy of an onchain fault dispute game.

use super::{Claim, ClaimData, GameError};
use ethers::types::H256;
use std::collections::{HashMap, VecDeque};

/// A claim stored in the [Game] along with the [ClaimData] of its children, in insertion order.
#[derive(Debug, Clone)]
struct Node {
    claim: Claim,
    children: Vec<ClaimData>,
}

/// The [Game] struct is the in-memory claim tree of a fault dispute game. Claims are linked to
/// their parent by value through [Claim::parent], and looked up by their [ClaimData].
#[derive(Debug, Clone)]
pub struct Game {
    root: ClaimData,
    nodes: HashMap<ClaimData, Node>,
    agree_with_proposed_output: bool,
    max_depth: u32,
}

impl Game {
    /// Creates a new [Game] rooted at the given claim.
    ///
    /// ### Takes
    /// - `root`: The depth-0 claim of the game.
    /// - `agree_with_proposed_output`: Whether the agent agrees with the proposed output root.
    /// - `max_depth`: The maximum depth of the game tree.
    pub fn new(root: Claim, agree_with_proposed_output: bool, max_depth: u32) -> Self {
        let root_data = root.claim_data;
        let mut nodes = HashMap::new();
        nodes.insert(
            root_data,
            Node {
                claim: root,
                children: Vec::new(),
            },
        );
        Self {
            root: root_data,
            nodes,
            agree_with_proposed_output,
            max_depth,
        }
    }

    /// Adds a claim to the game as the last child of its parent.
    ///
    /// ### Returns
    /// - `Ok(())`: The claim was added.
    /// - `Err(GameError::ClaimExists)`: The claim is a root claim or its [ClaimData] is already
    ///   present.
    /// - `Err(GameError::NoParent)`: The parent of the claim is not in the game.
    pub fn put(&mut self, claim: Claim) -> Result<(), GameError> {
        if claim.is_root() || self.nodes.contains_key(&claim.claim_data) {
            return Err(GameError::ClaimExists);
        }
        let parent = self
            .nodes
            .get_mut(&claim.parent)
            .ok_or(GameError::NoParent)?;
        parent.children.push(claim.claim_data);
        self.nodes.insert(
            claim.claim_data,
            Node {
                claim,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// Adds every claim in order, stopping at the first failure.
    pub fn put_all(&mut self, claims: impl IntoIterator<Item = Claim>) -> Result<(), GameError> {
        claims.into_iter().try_for_each(|claim| self.put(claim))
    }

    /// Returns every claim in the game in breadth-first order starting at the root.
    pub fn claims(&self) -> Vec<Claim> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([self.root]);
        while let Some(data) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&data) {
                out.push(node.claim.clone());
                queue.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Returns `true` if a claim with the same [ClaimData] is already in the game.
    pub fn is_duplicate(&self, claim: &Claim) -> bool {
        self.nodes.contains_key(&claim.claim_data)
    }

    /// Returns `true` if a claim with the given value already counters the claim at
    /// `parent_contract_index`.
    pub fn contains_move(&self, parent_contract_index: u32, value: H256) -> bool {
        self.nodes.values().any(|node| {
            !node.claim.is_root()
                && node.claim.parent_contract_index == parent_contract_index
                && node.claim.value() == value
        })
    }

    /// Returns `true` if the agent agrees with claims at the depth of the given claim.
    pub fn agree_with_claim_level(&self, claim: &Claim) -> bool {
        let is_odd = claim.depth() % 2 == 1;
        is_odd == self.agree_with_proposed_output
    }

    /// Fetches the parent of a claim.
    pub fn get_parent(&self, claim: &Claim) -> Result<&Claim, GameError> {
        if claim.is_root() {
            return Err(GameError::ClaimNotFound);
        }
        self.nodes
            .get(&claim.parent)
            .map(|node| &node.claim)
            .ok_or(GameError::ClaimNotFound)
    }

    pub fn root(&self) -> Option<&Claim> {
        self.nodes.get(&self.root).map(|node| &node.claim)
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn agree_with_proposed_output(&self) -> bool {
        self.agree_with_proposed_output
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fault::Position;

    fn claim(value: u8, position: Position, parent: &Claim, contract_index: u32) -> Claim {
        Claim {
            claim_data: ClaimData::new(H256::repeat_byte(value), position),
            parent: parent.claim_data,
            contract_index,
            parent_contract_index: parent.contract_index,
            ..Default::default()
        }
    }

    /// root
    /// ├── a (1,0)
    /// │   ├── c (2,0)
    /// │   └── d (2,2)
    /// └── b (1,0) with a different value
    ///     └── e (2,0)
    fn build() -> (Game, Vec<Claim>) {
        let root = Claim::root(H256::repeat_byte(1));
        let a = claim(2, Position::new(1, 0), &root, 1);
        let b = claim(3, Position::new(1, 0), &root, 2);
        let c = claim(4, Position::new(2, 0), &a, 3);
        let d = claim(5, Position::new(2, 2), &a, 4);
        let e = claim(6, Position::new(2, 0), &b, 5);
        let mut game = Game::new(root.clone(), false, 4);
        game.put_all([a.clone(), b.clone(), c.clone(), d.clone(), e.clone()])
            .unwrap();
        (game, vec![root, a, b, c, d, e])
    }

    #[test]
    fn claims_are_breadth_first() {
        let (game, expected) = build();
        assert_eq!(game.claims(), expected);
        assert_eq!(game.len(), 6);
    }

    #[test]
    fn rejects_duplicates_and_root() {
        let (mut game, claims) = build();
        for c in &claims {
            assert!(game.is_duplicate(c));
            assert_eq!(game.put(c.clone()), Err(GameError::ClaimExists));
        }

        let mut replay = claims[3].clone();
        replay.countered = true;
        replay.clock.duration = 100;
        assert!(game.is_duplicate(&replay));
        assert_eq!(game.put(replay), Err(GameError::ClaimExists));

        let other_root = Claim::root(H256::repeat_byte(9));
        assert_eq!(game.put(other_root), Err(GameError::ClaimExists));
    }

    #[test]
    fn rejects_orphans() {
        let (mut game, claims) = build();
        let ghost = claim(7, Position::new(2, 2), &claims[0], 9);
        let orphan = claim(8, Position::new(3, 4), &ghost, 10);
        assert_eq!(game.put(orphan), Err(GameError::NoParent));
    }

    #[test]
    fn parent_lookup() {
        let (game, claims) = build();
        assert_eq!(game.get_parent(&claims[4]).unwrap(), &claims[1]);
        assert_eq!(game.get_parent(&claims[0]), Err(GameError::ClaimNotFound));
        let ghost = claim(7, Position::new(2, 2), &claims[0], 9);
        let orphan = claim(8, Position::new(3, 4), &ghost, 10);
        assert_eq!(game.get_parent(&orphan), Err(GameError::ClaimNotFound));
    }

    #[test]
    fn level_agreement_alternates() {
        let (_, claims) = build();
        for agree in [true, false] {
            let game = Game::new(claims[0].clone(), agree, 4);
            for c in &claims {
                let expected = (c.depth() % 2 == 1) ^ !agree;
                assert_eq!(game.agree_with_claim_level(c), expected);
            }
        }
    }

    #[test]
    fn finds_existing_moves() {
        let (game, claims) = build();
        assert!(game.contains_move(1, claims[3].value()));
        assert!(!game.contains_move(2, claims[3].value()));
        assert!(!game.contains_move(u32::MAX, claims[0].value()));
    }
}
