/// 8 位 RGBA 颜色, 十六进制解析和 RGB565 编码
pub mod color;

/// 面板的四种旋转和坐标换算
pub mod orientation;

/// 包含边界的矩形
pub mod rect;

/// 按页面和图层存放的像素平面, 以及把它们合成为一帧的混合器
pub mod canvas;

/// 与面板通信: SCSI 封装的 USB bulk 协议和 AX206 驱动
pub mod transport;

/// 生成位图的 widget
pub mod widget;

/// 外部数据源
pub mod plugin;

/// 定时器和它们触发的动作
pub mod timer;

/// 页面、图层和 widget 的摆放
pub mod layout;

/// 五个阶段的更新循环, 单线程或流水线
pub mod scheduler;

/// 把上面所有东西接到调度器上
pub mod daemon;

/// TOML 配置文件
pub mod config;

// 数据流: plugins/timers 产生数值和翻页动作 -> widgets 生成位图
// -> layout 把位图画进 canvas -> display 合成一帧, 由 dirty tracker 比较后只发送变化的矩形
//
// 画布永远按物理方向存储, 旋转只发生在 add_pixel 的坐标换算里
// canvas 只被 layout 写、被 display 读, 锁只在拷贝的时候持有

use thiserror::Error;

/// 会终止守护进程的错误. 可恢复的错误 (越界像素, 单次传输失败) 只记录日志
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("device: {0}")]
    Transport(#[from] transport::TransportError),
    #[error(transparent)]
    Canvas(#[from] canvas::CanvasError),
    #[error("failed to start {stage} worker: {source}")]
    Spawn {
        stage: scheduler::Stage,
        source: std::io::Error,
    },
}
