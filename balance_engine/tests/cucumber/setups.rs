use balance_engine::{workers::adjustment::PolicyKind, EngineConfig};
use cucumber::given;

use crate::{
    common::{quiet_marketplace, setup_with},
    cucumber::BalanceWorld,
};

#[given("a fresh install")]
async fn fresh_install(world: &mut BalanceWorld) {
    world.system = Some(setup_with(quiet_marketplace(), EngineConfig::default()).await);
}

#[given(expr = "a fresh install with {word} adjustments")]
async fn fresh_install_with_policy(world: &mut BalanceWorld, policy: String) {
    let adjustment_policy = policy.parse::<PolicyKind>().expect("Unknown adjustment policy");
    let config = EngineConfig { adjustment_policy, ..Default::default() };
    world.system = Some(setup_with(quiet_marketplace(), config).await);
}
