// Concurrency tests: actors, mailboxes, futures, and messages.

use rho::compiler::compile_source;
use rho::value::Value;
use rho::vm::{SharedBuffer, Vm};

fn run(src: &str) -> (String, Value) {
    let image = compile_source(src).expect("compilation failed");
    let sink = SharedBuffer::new();
    let mut vm = Vm::with_sink(sink.clone());
    let status = vm.exec_image(&image, "<test>");
    (sink.contents(), Value::Int(status as i64))
}

fn run_ok(src: &str) -> String {
    let (out, status) = run(src);
    assert!(matches!(status, Value::Int(0)), "non-zero exit: {:?}", status);
    out
}

#[test]
fn test_actor_replies_via_future() {
    let src = "
act doubler() {
    while true {
        receive m
        m.reply(m.contents() * 2)
    }
}
a = doubler()
a.start()
f = a.send(21)
print f.get()
a.stop()
x = a.join()";
    assert_eq!(run_ok(src), "42\n");
}

#[test]
fn test_actor_join_after_stop_returns_null() {
    let src = "
act idle() {
    while true {
        receive m
    }
}
a = idle()
a.start()
a.stop()
print a.join()";
    assert_eq!(run_ok(src), "null\n");
}

#[test]
fn test_messages_are_fifo_per_sender() {
    // replies carry the running sum, so out-of-order delivery would show
    // up as a wrong partial sum
    let src = "
act summer() {
    s = 0
    while true {
        receive m
        s += m.contents()
        m.reply(s)
    }
}
a = summer()
a.start()
f1 = a.send(1)
f2 = a.send(2)
f3 = a.send(3)
print f1.get()
print f2.get()
print f3.get()
a.stop()
a.join()";
    assert_eq!(run_ok(src), "1\n3\n6\n");
}

#[test]
fn test_reply_twice_raises_actor_exception() {
    let src = "
act echo() {
    receive m
    m.reply(1)
    caught = 0
    try {
        m.reply(2)
    } catch (ActorException) {
        caught = 1
    }
    receive m2
    m2.reply(caught)
}
a = echo()
a.start()
f = a.send(0)
print f.get()
f2 = a.send(0)
print f2.get()
a.join()";
    assert_eq!(run_ok(src), "1\n1\n");
}

#[test]
fn test_future_get_timeout() {
    let src = "
act silent() {
    receive m
    receive m2
}
a = silent()
a.start()
f = a.send(1)
caught = 0
try {
    x = f.get(50)
} catch (ActorException) {
    caught = 1
}
print caught
a.stop()
a.join()";
    assert_eq!(run_ok(src), "1\n");
}

#[test]
fn test_actor_arguments_bind_like_calls() {
    let src = "
act greeter(prefix) {
    while true {
        receive m
        m.reply(prefix + m.contents())
    }
}
a = greeter(\"hi \")
a.start()
f = a.send(\"there\")
print f.get()
a.stop()
a.join()";
    assert_eq!(run_ok(src), "hi there\n");
}

#[test]
fn test_actor_cannot_restart() {
    let src = "
act once() {
    receive m
}
a = once()
a.start()
a.stop()
x = a.join()
caught = 0
try {
    a.start()
} catch (ActorException) {
    caught = 1
}
print caught";
    assert_eq!(run_ok(src), "1\n");
}

#[test]
fn test_actor_terminal_value_via_check_and_join() {
    let src = "
act worker() {
    receive m
    m.reply(0)
    return 123
}
a = worker()
a.start()
f = a.send(0)
x = f.get()
print a.join()";
    assert_eq!(run_ok(src), "123\n");
}
