use crate::classfile::{
    builder::{ClassBuilder, MethodBuilder},
    stackmap::{FrameKind, VerificationType},
    AccessFlags, ClassFile,
};

/// `demo/Counter`: a counting loop in `count(I)I` (lines 3 to 6) and a native `tick()V`.
pub fn counter_class() -> ClassFile {
    ClassBuilder::new("demo/Counter")
        .source_file("Counter.java")
        .method(
            MethodBuilder::new("count", "(I)I")
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .body(|body| {
                    let head = body.new_label();
                    let exit = body.new_label();
                    body.line(3);
                    body.op("iconst_0")?;
                    body.local("istore", 1)?;
                    body.place(head)?;
                    body.line(4);
                    body.local("iload", 1)?;
                    body.local("iload", 0)?;
                    body.branch("if_icmpge", exit)?;
                    body.line(5);
                    body.iinc(1, 1)?;
                    body.branch("goto", head)?;
                    body.place(exit)?;
                    body.line(6);
                    body.local("iload", 1)?;
                    body.op("ireturn")?;
                    body.frame(head, FrameKind::Append(vec![VerificationType::Integer]));
                    body.frame(exit, FrameKind::Same);
                    Ok(())
                }),
        )
        .method(
            MethodBuilder::new("tick", "()V")
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .native(),
        )
        .build()
        .unwrap()
}

/// A class with a static `run()V` made of one `nop` per entry of `lines`, then `return`.
pub fn lines_class(name: &str, lines: &'static [u16]) -> ClassFile {
    ClassBuilder::new(name)
        .method(
            MethodBuilder::new("run", "()V")
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .body(move |body| {
                    for line in lines {
                        body.line(*line);
                        body.op("nop")?;
                    }
                    body.op("return")
                }),
        )
        .build()
        .unwrap()
}
