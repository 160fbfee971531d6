use pal::execution::{ErrorKind, ExecError, Runtime, Value};

fn run(code: &str) -> Runtime {
    let mut rt = Runtime::new();
    let lines: Vec<&str> = code.lines().collect();
    rt.execute(&lines).unwrap_or_else(|err| panic!("program failed: {err}"));
    rt
}

fn solution(code: &str) -> Value {
    run(code).evaluate("solution()").unwrap()
}

#[test]
fn assignment_round_trip() {
    let mut rt = Runtime::new();
    rt.execute(&["x = 2 + 2"]).unwrap();
    assert_eq!(rt.evaluate("x").unwrap(), Value::Int(4));
}

#[test]
fn program_with_loops_and_lists() {
    let code = r#"
def solution():
    """Weekly savings."""
    savings = []
    total = 0
    for week in range(1, 5):
        amount = week * 2.5
        savings.append(amount)
        total += amount
    while total > 20:
        total -= 1
    return round(total, 2)
"#;
    assert_eq!(solution(code), Value::Float(20.0));
}

#[test]
fn program_using_math_and_floor_division() {
    let code = r#"
import math

def solution():
    boxes = math.ceil(47 / 6)
    leftover = 47 % 6
    pairs = 47 // 2
    return boxes * 100 + leftover * 10 + pairs % 10
"#;
    assert_eq!(solution(code), Value::Int(853));
}

#[test]
fn helper_functions_and_keyword_arguments() {
    let code = r#"
def cost(items, price=3, discount=0):
    return items * price - discount

def solution():
    return cost(5) + cost(2, discount=1, price=4)
"#;
    assert_eq!(solution(code), Value::Int(22));
}

#[test]
fn generator_arguments_do_not_leak_names() {
    let code = r#"
prices = {"apple": 2, "pear": 3}
basket = [("apple", 4), ("pear", 2), ("apple", 1)]
spent = sum(prices[name] * qty for name, qty in basket)
names = sorted(key for key in prices.keys())
"#;
    let mut rt = run(code);
    assert_eq!(rt.evaluate("spent").unwrap(), Value::Int(16));
    assert_eq!(rt.evaluate("len(names)").unwrap(), Value::Int(2));
    assert!(rt.get("key").is_none());
}

#[test]
fn printed_output_is_captured_not_written() {
    let mut rt = run("total = 7\nprint('total:', total)\nprint(f'{total / 2:.2f}')");
    assert_eq!(rt.take_output(), "total: 7\n3.50\n");
    assert_eq!(rt.output(), "");
}

#[test]
fn failures_keep_earlier_bindings() {
    let mut rt = Runtime::new();
    let err = rt.execute(&["a = 1", "b = a / 0", "c = 3"]).unwrap_err();
    match err {
        ExecError::Execution(e) => assert_eq!(e.kind, ErrorKind::ZeroDivisionError),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(rt.get("a"), Some(&Value::Int(1)));
    assert!(rt.get("c").is_none());
}

#[test]
fn evaluation_errors_are_distinct_from_execution_errors() {
    let mut rt = Runtime::new();
    assert!(matches!(rt.evaluate("missing + 1"), Err(ExecError::Evaluation(_))));
    assert!(matches!(rt.evaluate("1 +"), Err(ExecError::Evaluation(_))));
    assert!(matches!(rt.execute(&["def f(:"]), Err(ExecError::Execution(_))));
}

#[test]
fn helpers_update_shared_lists_and_read_enclosing_values() {
    let code = r#"
def solution():
    price = 5
    def total(qty):
        return price * qty
    orders = [[1], [2]]
    def add(order, qty):
        order.append(qty)
    for order in orders:
        add(order, 1)
    basket = orders
    basket.append([3])
    return total(3) + sum(len(o) for o in orders) * 100
"#;
    assert_eq!(solution(code), Value::Int(515));
}

#[test]
fn oversized_values_fail_without_aborting() {
    let mut rt = Runtime::new();
    for expr in ["'ab' * 2 ** 62", "[1, 2, 3, 4, 5] * 2 ** 62", "list(range(2 ** 40))"] {
        match rt.evaluate(expr) {
            Err(ExecError::Evaluation(e)) => assert_eq!(e.kind, ErrorKind::MemoryError, "{expr}"),
            other => panic!("{expr}: unexpected result {other:?}"),
        }
    }
}

#[test]
fn deep_nesting_and_recursion_report_errors() {
    let mut rt = Runtime::new();
    let parens = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
    match rt.evaluate(&parens) {
        Err(ExecError::Evaluation(e)) => assert_eq!(e.kind, ErrorKind::SyntaxError),
        other => panic!("unexpected result: {other:?}"),
    }
    let nested = format!("{}1{}", "(".repeat(150), ")".repeat(150));
    assert_eq!(rt.evaluate(&nested).unwrap(), Value::Int(1));

    rt.execute(&["def down(n):", "    return down(n + 1)"]).unwrap();
    match rt.execute(&["down(0)"]) {
        Err(ExecError::Execution(e)) => assert_eq!(e.kind, ErrorKind::RecursionError),
        other => panic!("unexpected result: {other:?}"),
    }
}
