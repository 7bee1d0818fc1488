use behavior_tree_core::{
    hash_map,
    json_export::{export_blackboard_to_json, import_blackboard_from_json, JsonExporter},
    BehaviorNode, BehaviorNodeContainer, Blackboard, Context, ControlNode, CoroAction,
    CoroContext, DecoratorNode, Error, NodeKind, NodeStatus, PortSpec, PortsList, Result,
    SetBlackboard, Sleep, StatefulActionNode, ThreadContext, ThreadedActionNode, Tree, TreeConfig,
};
use serde::{Deserialize, Serialize};
use std::{
    cell::Cell,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const SLEEP: Duration = Duration::from_millis(5);

struct PrintArm;

impl BehaviorNode for PrintArm {
    fn provided_ports(&self) -> PortsList {
        vec![
            PortSpec::input::<String>("arm"),
            PortSpec::output::<String>("printed"),
        ]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let arm: String = ctx.get_input("arm")?;
        ctx.set_output("printed", format!("printed {}", arm))?;
        Ok(NodeStatus::Success)
    }
}

#[test]
fn test_ports() {
    let root = BehaviorNodeContainer::new_node(ControlNode::sequence())
        .with_children([
            BehaviorNodeContainer::new(
                NodeKind::action(PrintArm),
                hash_map!("arm" => "{left}", "printed" => "{out_left}"),
            ),
            BehaviorNodeContainer::new(
                NodeKind::action(PrintArm),
                hash_map!("arm" => "rightArm", "printed" => "{out_right}"),
            ),
        ])
        .unwrap();
    let mut tree = Tree::new(root).unwrap();
    let bb = tree.root_blackboard().clone();

    // An entry that was declared but never written
    assert!(matches!(tree.tick_once(), Err(Error::Runtime(_))));

    bb.set("left", "leftArm".to_string()).unwrap();
    assert_eq!(tree.tick_once().unwrap(), NodeStatus::Success);
    assert_eq!(bb.get::<String>("out_left").unwrap(), "printed leftArm");
    assert_eq!(bb.get::<String>("out_right").unwrap(), "printed rightArm");
}

struct SlowAdd {
    delay: Duration,
}

impl ThreadedActionNode for SlowAdd {
    fn provided_ports(&self) -> PortsList {
        vec![
            PortSpec::input::<i32>("a"),
            PortSpec::input::<i32>("b"),
            PortSpec::output::<i32>("sum"),
        ]
    }

    fn tick(&mut self, ctx: &ThreadContext) -> Result<NodeStatus> {
        let a: i32 = ctx.get_input("a")?;
        let b: i32 = ctx.get_input("b")?;
        thread::sleep(self.delay);
        ctx.set_output("sum", a + b)?;
        Ok(NodeStatus::Success)
    }
}

#[test]
fn test_threaded_action() {
    let root = BehaviorNodeContainer::new(
        NodeKind::threaded(SlowAdd {
            delay: Duration::from_millis(20),
        }),
        hash_map!("a" => "2", "b" => "{b}", "sum" => "{sum}"),
    );
    let mut tree = Tree::new(root).unwrap();
    tree.root_blackboard().set("b", 40).unwrap();

    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    assert_eq!(tree.tick_while_running(SLEEP).unwrap(), NodeStatus::Success);
    assert_eq!(tree.root_blackboard().get::<i32>("sum").unwrap(), 42);
}

/// Fails on its first run only.
struct FailOnce {
    runs: Arc<AtomicUsize>,
}

impl ThreadedActionNode for FailOnce {
    fn tick(&mut self, _ctx: &ThreadContext) -> Result<NodeStatus> {
        if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(Error::runtime("no luck"))
        } else {
            Ok(NodeStatus::Success)
        }
    }
}

struct Panicking;

impl ThreadedActionNode for Panicking {
    fn tick(&mut self, _ctx: &ThreadContext) -> Result<NodeStatus> {
        panic!("worker exploded");
    }
}

#[test]
fn test_threaded_errors_reach_the_driver() {
    let runs = Arc::new(AtomicUsize::new(0));
    let body = FailOnce { runs: runs.clone() };
    let mut tree = Tree::new(BehaviorNodeContainer::new_node(NodeKind::threaded(body))).unwrap();
    let err = tree.tick_while_running(SLEEP).unwrap_err();
    assert_eq!(err, Error::runtime("no luck"));
    assert_eq!(tree.root_status(), NodeStatus::Idle);

    // The error was consumed; the next run starts a fresh worker.
    assert_eq!(tree.tick_while_running(SLEEP).unwrap(), NodeStatus::Success);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let mut tree = Tree::new(BehaviorNodeContainer::new_node(NodeKind::threaded(Panicking))).unwrap();
    assert!(matches!(
        tree.tick_while_running(SLEEP),
        Err(Error::Runtime(msg)) if msg.contains("panicked")
    ));
}

struct UntilHalted {
    exited: Arc<AtomicBool>,
}

impl ThreadedActionNode for UntilHalted {
    fn tick(&mut self, ctx: &ThreadContext) -> Result<NodeStatus> {
        while !ctx.is_halt_requested() {
            thread::sleep(Duration::from_millis(1));
        }
        self.exited.store(true, Ordering::SeqCst);
        Ok(NodeStatus::Failure)
    }
}

#[test]
fn test_halt_waits_for_worker() {
    let exited = Arc::new(AtomicBool::new(false));
    let mut tree = Tree::new(BehaviorNodeContainer::new_node(NodeKind::threaded(
        UntilHalted {
            exited: exited.clone(),
        },
    )))
    .unwrap();

    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    tree.halt_tree().unwrap();
    assert!(exited.load(Ordering::SeqCst));
    assert_eq!(tree.root_status(), NodeStatus::Idle);
}

fn countdown(starts: Rc<Cell<u32>>) -> CoroAction {
    CoroAction::new(
        "Countdown",
        vec![PortSpec::output::<i32>("steps")],
        move |ctx: CoroContext| {
            starts.set(starts.get() + 1);
            async move {
                let mut steps = 0;
                for _ in 0..3 {
                    ctx.yield_running().await;
                    steps += 1;
                }
                ctx.set_output("steps", steps)?;
                Ok::<_, Error>(NodeStatus::Success)
            }
        },
    )
}

#[test]
fn test_coroutine_action() {
    let starts = Rc::new(Cell::new(0));
    let root = BehaviorNodeContainer::new(
        NodeKind::coro(countdown(starts.clone())),
        hash_map!("steps" => "{steps}"),
    );
    let mut tree = Tree::new(root).unwrap();

    for _ in 0..3 {
        assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    }
    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Success);
    assert_eq!(tree.root_blackboard().get::<i32>("steps").unwrap(), 3);
    assert_eq!(starts.get(), 1);

    // Halting drops the suspended body; the next tick starts over
    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    tree.halt_tree().unwrap();
    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    assert_eq!(starts.get(), 3);
}

#[test]
fn test_delay() {
    let root = BehaviorNodeContainer::new_node(DecoratorNode::delay_ms(30))
        .with_child(BehaviorNodeContainer::new_node(NodeKind::action(
            behavior_tree_core::AlwaysSuccess,
        )))
        .unwrap();
    let mut tree = Tree::new(root).unwrap();

    let start = Instant::now();
    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    assert_eq!(tree.tick_while_running(SLEEP).unwrap(), NodeStatus::Success);
    assert!(start.elapsed() >= Duration::from_millis(30));
}

struct Busy(Rc<Cell<u32>>);

impl StatefulActionNode for Busy {
    fn on_start(&mut self, _ctx: &mut Context) -> Result<NodeStatus> {
        Ok(NodeStatus::Running)
    }

    fn on_running(&mut self, _ctx: &mut Context) -> Result<NodeStatus> {
        Ok(NodeStatus::Running)
    }

    fn on_halted(&mut self, _ctx: &mut Context) -> Result<()> {
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

#[test]
fn test_timeout() {
    let halts = Rc::new(Cell::new(0));
    let root = BehaviorNodeContainer::new(DecoratorNode::timeout(), hash_map!("msec" => "20"))
        .with_child(BehaviorNodeContainer::new_node(NodeKind::stateful(Busy(
            halts.clone(),
        ))))
        .unwrap();
    let mut tree = Tree::new(root).unwrap();

    let start = Instant::now();
    assert_eq!(tree.tick_while_running(SLEEP).unwrap(), NodeStatus::Failure);
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(halts.get(), 1);

    // A child that finishes in time cancels the timer
    let root = BehaviorNodeContainer::new_node(DecoratorNode::timeout_ms(1000))
        .with_child(BehaviorNodeContainer::new(
            NodeKind::stateful(Sleep::default()),
            hash_map!("msec" => "10"),
        ))
        .unwrap();
    let mut tree = Tree::new(root).unwrap();
    let start = Instant::now();
    assert_eq!(tree.tick_while_running(SLEEP).unwrap(), NodeStatus::Success);
    assert!(start.elapsed() < Duration::from_millis(1000));
}

#[test]
fn test_sleep() {
    let root = BehaviorNodeContainer::new(
        NodeKind::stateful(Sleep::default()),
        hash_map!("msec" => "{duration}"),
    );
    let mut tree = Tree::new(root).unwrap();
    tree.root_blackboard().set("duration", 25u64).unwrap();

    let start = Instant::now();
    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    assert_eq!(tree.tick_while_running(SLEEP).unwrap(), NodeStatus::Success);
    assert!(start.elapsed() >= Duration::from_millis(25));

    tree.root_blackboard().set("duration", 0u64).unwrap();
    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Success);
}

#[test]
fn test_wake_up_shortens_the_wait() {
    let root = BehaviorNodeContainer::new(
        NodeKind::stateful(Sleep::default()),
        hash_map!("msec" => "10"),
    );
    let mut tree = Tree::new(root).unwrap();

    // The sleep between ticks is long, but the timer wakes the driver up
    let start = Instant::now();
    assert_eq!(
        tree.tick_while_running(Duration::from_secs(5)).unwrap(),
        NodeStatus::Success
    );
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pose {
    x: f64,
    y: f64,
    theta: f64,
}

#[test]
fn test_blackboard_json_round_trip() {
    JsonExporter::register::<Pose>("Pose");

    let root = BehaviorNodeContainer::new(
        NodeKind::action(SetBlackboard),
        hash_map!("value" => "hello", "output_key" => "greeting"),
    );
    let mut tree = Tree::new(root).unwrap();
    tree.tick_once().unwrap();
    let bb = tree.root_blackboard();
    bb.set("speed", 1.5f64).unwrap();
    bb.set(
        "pose",
        Pose {
            x: 1.0,
            y: 2.0,
            theta: 0.5,
        },
    )
    .unwrap();

    let json = export_blackboard_to_json(bb);
    assert_eq!(json["greeting"], "hello");
    assert_eq!(json["pose"]["__type"], "Pose");

    let restored = Blackboard::new();
    import_blackboard_from_json(&json, &restored).unwrap();
    assert_eq!(restored.get::<String>("greeting").unwrap(), "hello");
    assert_eq!(restored.get::<f64>("speed").unwrap(), 1.5);
    assert_eq!(restored.get::<Pose>("pose").unwrap().theta, 0.5);
}

#[test]
fn test_config_from_yaml() {
    let config = TreeConfig::from_yaml("throw_if_multiple_running: true\ntick_sleep_ms: 1\n").unwrap();
    assert!(config.throw_if_multiple_running);
    assert_eq!(config.tick_sleep(), Duration::from_millis(1));
    assert!(!config.auto_remapping);

    assert!(matches!(
        TreeConfig::from_yaml("tick_sleep_ms: soon"),
        Err(Error::Config(_))
    ));
}
