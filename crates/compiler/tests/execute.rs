//! End-to-end tests: compile words and run them
//!
//! Only meaningful where the generated code can execute.

#![cfg(target_arch = "aarch64")]

use kilnc::{CompileError, Convention, Jit, JitConfig, Signature, SymbolId};

fn jit(convention: Convention) -> Jit {
    Jit::new(JitConfig::default().with_convention(convention)).unwrap()
}

fn define(jit: &mut Jit, name: &str, inputs: usize, outputs: usize, body: &[&str]) -> SymbolId {
    jit.begin_word(name, Signature::new(inputs, outputs)).unwrap();
    for word in body {
        match *word {
            "if" => jit.compile_if().unwrap(),
            "else" => jit.compile_else().unwrap(),
            "then" => jit.compile_then().unwrap(),
            "recurse" => jit.compile_recurse().unwrap(),
            "return" => jit.compile_return().unwrap(),
            "throw" => jit.compile_throw().unwrap(),
            _ => match word.parse::<i64>() {
                Ok(n) => jit.compile_literal(n).unwrap(),
                Err(_) => match word.strip_prefix("->") {
                    Some(local) => jit.compile_local_set(local).unwrap(),
                    None => jit.compile_word(word).unwrap(),
                },
            },
        }
    }
    jit.end_word().unwrap()
}

const BOTH: [Convention; 2] = [Convention::Register, Convention::Stack];

#[test]
fn test_square() {
    for convention in BOTH {
        let mut jit = jit(convention);
        let square = define(&mut jit, "square", 1, 1, &["dup", "*"]);
        assert_eq!(jit.invoke(square, &[7]).unwrap(), vec![49]);
        assert_eq!(jit.invoke(square, &[-3]).unwrap(), vec![9]);
    }
}

#[test]
fn test_calls_without_inlining() {
    for convention in BOTH {
        let mut jit = Jit::new(
            JitConfig::default()
                .with_convention(convention)
                .with_auto_inline(false),
        )
        .unwrap();
        define(&mut jit, "square", 1, 1, &["dup", "*"]);
        let quad = define(&mut jit, "quad", 1, 1, &["square", "square"]);
        assert_eq!(jit.invoke(quad, &[3]).unwrap(), vec![81]);
        assert!(!jit.symbol(quad).unwrap().native().unwrap().leaf);
    }
}

#[test]
fn test_large_literals() {
    for convention in BOTH {
        let mut jit = jit(convention);
        let big = define(&mut jit, "big", 0, 1, &["81985529216486895"]);
        let small = define(&mut jit, "small", 0, 1, &["-2"]);
        assert_eq!(jit.invoke(big, &[]).unwrap(), vec![0x0123_4567_89AB_CDEF]);
        assert_eq!(jit.invoke(small, &[]).unwrap(), vec![-2]);
    }
}

#[test]
fn test_locals_survive_calls() {
    for convention in BOTH {
        let mut jit = jit(convention);
        let keep = define(&mut jit, "keep", 1, 1, &["->a", "a", "abs", "a", "+"]);
        assert_eq!(jit.invoke(keep, &[5]).unwrap(), vec![10]);
        assert_eq!(jit.invoke(keep, &[-3]).unwrap(), vec![0]);
    }
}

#[test]
fn test_branches() {
    for convention in BOTH {
        let mut jit = jit(convention);
        let sign = define(
            &mut jit,
            "sign",
            1,
            1,
            &["->n", "n", "0", "<", "if", "-1", "else", "n", "0", ">", "if", "1", "else", "0", "then", "then"],
        );
        assert_eq!(jit.invoke(sign, &[-9]).unwrap(), vec![-1]);
        assert_eq!(jit.invoke(sign, &[0]).unwrap(), vec![0]);
        assert_eq!(jit.invoke(sign, &[12]).unwrap(), vec![1]);
    }
}

#[test]
fn test_early_return() {
    let mut jit = jit(Convention::Register);
    let clamp = define(
        &mut jit,
        "clamp",
        1,
        1,
        &["->n", "n", "0", "<", "if", "0", "return", "then", "n"],
    );
    assert_eq!(jit.invoke(clamp, &[-4]).unwrap(), vec![0]);
    assert_eq!(jit.invoke(clamp, &[4]).unwrap(), vec![4]);
}

#[test]
fn test_deep_recursion() {
    let handle = std::thread::Builder::new()
        .stack_size(64 << 20)
        .spawn(|| {
            let mut jit = jit(Convention::Register);
            let countdown = define(
                &mut jit,
                "countdown",
                1,
                1,
                &["->n", "n", "0", "<=", "if", "0", "else", "n", "1", "-", "recurse", "then"],
            );
            jit.invoke(countdown, &[100_000]).unwrap()
        })
        .unwrap();
    assert_eq!(handle.join().unwrap(), vec![0]);
}

#[test]
fn test_division_by_zero_raises() {
    for convention in BOTH {
        let mut jit = jit(convention);
        let safe = define(&mut jit, "safe", 2, 1, &["/"]);
        assert_eq!(jit.invoke(safe, &[7, 2]).unwrap(), vec![3]);
        assert!(matches!(jit.invoke(safe, &[7, 0]), Err(CompileError::Raised(1))));

        let divide = jit.lookup("/").unwrap();
        assert!(matches!(jit.invoke(divide, &[1, 0]), Err(CompileError::Raised(1))));
    }
}

#[test]
fn test_error_as_value_without_auto_try() {
    let mut jit = jit(Convention::Register);
    jit.begin_word("try-div", Signature::new(2, 2).with_auto_try(false))
        .unwrap();
    jit.compile_word("/").unwrap();
    let id = jit.end_word().unwrap();
    assert_eq!(jit.invoke(id, &[9, 3]).unwrap(), vec![3, 0]);
    assert_eq!(jit.invoke(id, &[9, 0]).unwrap(), vec![0, 1]);
}

#[test]
fn test_throw() {
    let mut jit = jit(Convention::Register);
    let fail = define(&mut jit, "fail", 1, 0, &["throw"]);
    assert!(jit.invoke(fail, &[0]).unwrap().is_empty());
    assert!(matches!(jit.invoke(fail, &[42]), Err(CompileError::Raised(42))));
}

#[test]
fn test_external_function() {
    for convention in BOTH {
        let mut jit = jit(convention);
        let labs = jit.resolve_external("labs", 1, 1).unwrap();
        assert_eq!(jit.invoke(labs, &[-5]).unwrap(), vec![5]);

        let wrap = define(&mut jit, "distance", 2, 1, &["-", "labs"]);
        assert_eq!(jit.invoke(wrap, &[3, 10]).unwrap(), vec![7]);
    }
}

#[test]
fn test_variables() {
    let mut jit = jit(Convention::Register);
    let cell = jit.allocate_data(1).unwrap().to_string();
    let store = define(&mut jit, "store", 1, 0, &[cell.as_str(), "!"]);
    let fetch = define(&mut jit, "fetch", 0, 1, &[cell.as_str(), "@"]);
    jit.invoke(store, &[1234]).unwrap();
    assert_eq!(jit.invoke(fetch, &[]).unwrap(), vec![1234]);
}
