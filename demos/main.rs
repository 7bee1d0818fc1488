use ::behavior_tree_core::{
    hash_map, json_export::export_blackboard_to_json, visitor, BehaviorNode,
    BehaviorNodeContainer, Context, ControlNode, DecoratorNode, Lazy, NodeKind, NodeStatus,
    PortSpec, PortsList, Result, Symbol, ThreadContext, ThreadedActionNode, Tree, TreeConfig,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone, Debug)]
struct Arm {
    name: String,
}

#[derive(Clone, Debug)]
struct Body {
    left_arm: Arm,
    right_arm: Arm,
}

static ARM: Lazy<Symbol> = Lazy::new(|| "arm".into());
static LEFT_ARM: Lazy<Symbol> = Lazy::new(|| "left_arm".into());
static RIGHT_ARM: Lazy<Symbol> = Lazy::new(|| "right_arm".into());

struct PrintArmNode;

impl BehaviorNode for PrintArmNode {
    fn provided_ports(&self) -> PortsList {
        vec![PortSpec::input::<String>(*ARM)]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let arm: String = ctx.get_input(ARM.as_str())?;
        println!("PrintArmNode: {}", arm);
        Ok(NodeStatus::Success)
    }
}

struct PrintBodyNode;

impl BehaviorNode for PrintBodyNode {
    fn provided_ports(&self) -> PortsList {
        vec![
            PortSpec::output::<String>(*LEFT_ARM),
            PortSpec::output::<String>(*RIGHT_ARM),
        ]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let Ok(body) = ctx.blackboard().get::<Body>("@body") else {
            return Ok(NodeStatus::Failure);
        };
        println!("PrintBodyNode: {:?}", body);
        ctx.set_output(LEFT_ARM.as_str(), body.left_arm.name)?;
        ctx.set_output(RIGHT_ARM.as_str(), body.right_arm.name)?;
        Ok(NodeStatus::Success)
    }
}

/// Waves an arm for a while on a worker thread.
struct WaveArm;

impl ThreadedActionNode for WaveArm {
    fn provided_ports(&self) -> PortsList {
        vec![PortSpec::input::<String>(*ARM)]
    }

    fn tick(&mut self, ctx: &ThreadContext) -> Result<NodeStatus> {
        let arm: String = ctx.get_input(ARM.as_str())?;
        for i in 0..3 {
            if ctx.is_halt_requested() {
                return Ok(NodeStatus::Failure);
            }
            println!("WaveArm: {} ({})", arm, i);
            std::thread::sleep(Duration::from_millis(30));
        }
        Ok(NodeStatus::Success)
    }
}

fn build() -> anyhow::Result<BehaviorNodeContainer> {
    let print_arms = BehaviorNodeContainer::new_node(ControlNode::sequence()).with_children([
        BehaviorNodeContainer::new(NodeKind::action(PrintArmNode), hash_map!("arm" => "{left}")),
        BehaviorNodeContainer::new(NodeKind::action(PrintArmNode), hash_map!("arm" => "{right}")),
    ])?;

    let wave = BehaviorNodeContainer::new_node(DecoratorNode::timeout_ms(500)).with_child(
        BehaviorNodeContainer::new(NodeKind::threaded(WaveArm), hash_map!("arm" => "{left}")),
    )?;

    Ok(BehaviorNodeContainer::new_node(ControlNode::sequence())
        .with_name("main")
        .with_children([
            BehaviorNodeContainer::new(
                NodeKind::action(PrintBodyNode),
                hash_map!("left_arm" => "{left}", "right_arm" => "{right}"),
            ),
            BehaviorNodeContainer::subtree("PrintArms", print_arms).with_auto_remapping(true),
            wave,
        ])?)
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => TreeConfig::from_yaml(&std::fs::read_to_string(path)?)?,
        None => TreeConfig::default(),
    };
    let sleep = config.tick_sleep();

    let mut tree = Tree::builder().config(config).build(build()?)?;
    tree.root_blackboard().set(
        "body",
        Body {
            left_arm: Arm {
                name: "left_arm".to_string(),
            },
            right_arm: Arm {
                name: "right_arm".to_string(),
            },
        },
    )?;

    visitor::print_tree_recursively(&tree);
    let status = tree.tick_while_running(sleep)?;
    info!(%status, "tree finished");

    println!("{}", serde_json::to_string_pretty(&export_blackboard_to_json(tree.root_blackboard()))?);
    println!("Total symbols: {}", Symbol::count());
    Ok(())
}
