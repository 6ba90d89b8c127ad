use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::job::RecognitionJob;

/// 队列中的消息
#[derive(Debug)]
pub enum Message {
    Job(RecognitionJob),
    /// 退出信号
    Stop,
}

/// 任务队列的发送端，可以在任意多个线程中克隆使用
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: Sender<Message>,
}

/// 任务队列的接收端，只由识别线程持有
#[derive(Debug)]
pub struct JobReceiver {
    rx: Receiver<Message>,
}

/// 创建一个无界的先进先出任务队列
pub fn job_queue() -> (JobQueue, JobReceiver) {
    let (tx, rx) = unbounded();
    (JobQueue { tx }, JobReceiver { rx })
}

impl JobQueue {
    /// 将任务放入队列，不会阻塞
    ///
    /// 接收端已关闭时原样返回任务
    pub fn enqueue(&self, job: RecognitionJob) -> Result<(), RecognitionJob> {
        self.tx.send(Message::Job(job)).map_err(|e| match e.into_inner() {
            Message::Job(job) => job,
            Message::Stop => unreachable!(),
        })
    }

    /// 发送退出信号，识别线程处理完之前的任务后退出
    pub fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }

    /// 当前排队中的消息数量
    pub fn depth(&self) -> usize {
        self.tx.len()
    }
}

impl JobReceiver {
    /// 阻塞等待下一个任务，收到退出信号或所有发送端关闭时返回 None
    pub fn dequeue(&self) -> Option<RecognitionJob> {
        match self.rx.recv() {
            Ok(Message::Job(job)) => Some(job),
            Ok(Message::Stop) | Err(_) => None,
        }
    }

    /// 取出队列中剩余的所有任务，不阻塞，忽略退出信号
    pub fn drain(&self) -> Vec<RecognitionJob> {
        self.rx
            .try_iter()
            .filter_map(|message| match message {
                Message::Job(job) => Some(job),
                Message::Stop => None,
            })
            .collect()
    }
}
